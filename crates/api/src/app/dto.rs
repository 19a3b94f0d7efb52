//! Query-string shapes and response envelopes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use labinv_core::{Page, PageRequest};
use labinv_inventory::{BatchReport, StatusFilter, StockSearch};
use labinv_products::{PmFilter, ProductQuery, ProductSort};

/// Common list parameters. Values stay strings so garbage falls back to defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub q: Option<String>,
    pub status: Option<String>,
    pub pm: Option<String>,
    #[serde(rename = "isPM")]
    pub is_pm: Option<String>,
    #[serde(rename = "sortBy")]
    pub sort_by: Option<String>,
    #[serde(rename = "sortDir")]
    pub sort_dir: Option<String>,
}

impl ListQuery {
    pub fn page(&self) -> PageRequest {
        PageRequest::from_query(self.page.as_deref(), self.limit.as_deref())
    }

    pub fn q(&self) -> Option<&str> {
        self.q.as_deref().map(str::trim).filter(|q| !q.is_empty())
    }

    pub fn stock_search(&self) -> StockSearch {
        StockSearch::new(StatusFilter::parse(self.status.as_deref()), self.q())
    }

    pub fn product_query(&self) -> ProductQuery {
        ProductQuery::new(PmFilter::parse(self.pm.as_deref().or(self.is_pm.as_deref())), self.q())
            .sorted(ProductSort::parse(self.sort_by.as_deref(), self.sort_dir.as_deref()))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdsQuery {
    pub ids: Option<String>,
}

impl IdsQuery {
    /// Comma-separated ids; unparsable entries are skipped.
    pub fn parse<T: core::str::FromStr>(&self) -> Vec<T> {
        self.ids
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlagQuery {
    pub admin: Option<String>,
    #[serde(rename = "includeDeviceNames")]
    pub include_device_names: Option<String>,
    pub mine: Option<String>,
}

pub fn flag(raw: &Option<String>) -> bool {
    matches!(raw.as_deref().map(str::trim), Some("1") | Some("true"))
}

/// `{ok: true, ...fields}`.
pub fn ok_json(fields: Value) -> Response {
    let mut body = json!({ "ok": true });
    if let (Some(target), Value::Object(fields)) = (body.as_object_mut(), fields) {
        target.extend(fields);
    }
    (StatusCode::OK, axum::Json(body)).into_response()
}

pub fn page_json<T: Serialize>(page: Page<T>) -> Response {
    ok_json(json!({ "items": page.items, "page": page.page }))
}

/// Batch result under `count_key` (`moved`, `discarded`, ...).
pub fn batch_json(count_key: &str, report: &BatchReport) -> Response {
    let mut fields = serde_json::Map::new();
    fields.insert(count_key.to_string(), json!(report.succeeded));
    fields.insert("details".to_string(), json!(report.details));
    ok_json(Value::Object(fields))
}

/// Parse a path or body id; 400 with `INVALID_ID` otherwise.
pub fn parse_id<T>(raw: &str) -> Result<T, Response>
where
    T: core::str::FromStr<Err = labinv_core::DomainError>,
{
    raw.parse()
        .map_err(|e: labinv_core::DomainError| crate::app::errors::json_error(StatusCode::BAD_REQUEST, "INVALID_ID", e.to_string()))
}

// Request bodies

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: String,
}

impl LoginRequest {
    /// Username wins when both are sent.
    pub fn login(&self) -> &str {
        self.username
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .or(self.email.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SignupInitRequest {
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VerifyCodeRequest {
    pub email: String,
    pub code: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompleteRequest {
    pub ticket: String,
    pub password: String,
    pub password_confirm: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MaintenanceUpdate {
    pub on: Option<bool>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RegisterDeviceRequest {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IamsUpdate {
    pub stock_id: String,
    pub iams_id: Option<String>,
}

/// Tree editor payload: `{nodes: [...]}` or `{tree: [...]}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TreeSaveRequest {
    #[serde(alias = "tree")]
    pub nodes: Vec<labinv_locations::TreeNodeInput>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use labinv_core::ProductId;

    #[test]
    fn ids_skip_garbage() {
        let id = ProductId::new();
        let q = IdsQuery {
            ids: Some(format!("{id}, nope,,")),
        };
        assert_eq!(q.parse::<ProductId>(), vec![id]);
    }

    #[test]
    fn login_prefers_username() {
        let body: LoginRequest =
            serde_json::from_str(r#"{"username":" ","email":"a@b.io","password":"x"}"#).unwrap();
        assert_eq!(body.login(), "a@b.io");
    }

    #[test]
    fn pm_accepts_legacy_name() {
        let q = ListQuery {
            is_pm: Some("true".into()),
            ..ListQuery::default()
        };
        assert_eq!(q.product_query().pm, PmFilter::Pm);
    }

    #[test]
    fn product_sort_comes_from_query_string() {
        let q: ListQuery = serde_json::from_str(
            r#"{"sortBy":"price","sortDir":"desc","q":"keysight  psu"}"#,
        )
        .unwrap();
        let query = q.product_query();
        assert_eq!(query.sort, ProductSort::parse(Some("price"), Some("desc")));
        assert_eq!(query.tokens, ["keysight", "psu"]);
    }
}
