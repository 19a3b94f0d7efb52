//! Catalogue listing rules: PM filter, keyword match and sort order.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::product::Product;

/// Property-managed filter for product and stock listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PmFilter {
    #[default]
    All,
    Pm,
    NonPm,
}

impl PmFilter {
    /// Accepts `true/1/pm`, `false/0/nonpm`; anything else means all.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("true") | Some("1") | Some("pm") => Self::Pm,
            Some("false") | Some("0") | Some("nonpm") | Some("non_pm") => Self::NonPm,
            _ => Self::All,
        }
    }

    pub fn admits(&self, is_property_managed: bool) -> bool {
        match self {
            Self::All => true,
            Self::Pm => is_property_managed,
            Self::NonPm => !is_property_managed,
        }
    }
}

/// Primary sort column for catalogue listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    Name,
    Model,
    #[default]
    Brand,
    Price,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProductSort {
    pub by: SortBy,
    pub dir: SortDir,
}

impl ProductSort {
    /// Unknown columns fall back to brand; anything but `desc` is ascending.
    pub fn parse(by: Option<&str>, dir: Option<&str>) -> Self {
        let by = match by.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("name") => SortBy::Name,
            Some("model") => SortBy::Model,
            Some("price") => SortBy::Price,
            _ => SortBy::Brand,
        };
        let dir = match dir.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("desc") => SortDir::Desc,
            _ => SortDir::Asc,
        };
        Self { by, dir }
    }

    /// Primary column, then brand, model and name, then newest first.
    /// Missing prices go last ascending and first descending.
    pub fn compare(&self, a: &Product, b: &Product) -> Ordering {
        let directed = |o: Ordering| match self.dir {
            SortDir::Asc => o,
            SortDir::Desc => o.reverse(),
        };
        let text = |f: fn(&Product) -> &str| f(a).to_lowercase().cmp(&f(b).to_lowercase());
        let primary = match self.by {
            SortBy::Name => directed(text(|p| p.name.as_str())),
            SortBy::Model => directed(text(|p| p.model.as_str())),
            SortBy::Brand => directed(text(|p| p.brand.as_str())),
            SortBy::Price => match (a.price, b.price) {
                (Some(x), Some(y)) => directed(x.total_cmp(&y)),
                (None, None) => Ordering::Equal,
                (Some(_), None) => directed(Ordering::Less),
                (None, Some(_)) => directed(Ordering::Greater),
            },
        };
        let mut order = primary;
        if self.by != SortBy::Brand {
            order = order.then_with(|| text(|p| p.brand.as_str()));
        }
        if self.by != SortBy::Model {
            order = order.then_with(|| text(|p| p.model.as_str()));
        }
        if self.by != SortBy::Name {
            order = order.then_with(|| text(|p| p.name.as_str()));
        }
        order.then_with(|| b.created_at.cmp(&a.created_at))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductQuery {
    pub pm: PmFilter,
    /// Lowercased whitespace-separated keywords; each must hit some field.
    pub tokens: Vec<String>,
    pub sort: ProductSort,
}

impl ProductQuery {
    pub fn new(pm: PmFilter, q: Option<&str>) -> Self {
        let tokens = q
            .map(|s| s.split_whitespace().map(str::to_lowercase).collect())
            .unwrap_or_default();
        Self {
            pm,
            tokens,
            sort: ProductSort::default(),
        }
    }

    pub fn sorted(mut self, sort: ProductSort) -> Self {
        self.sort = sort;
        self
    }

    pub fn matches(&self, product: &Product) -> bool {
        if !self.pm.admits(product.is_property_managed) {
            return false;
        }
        let fields = [
            product.name.to_lowercase(),
            product.brand.to_lowercase(),
            product.model.to_lowercase(),
        ];
        self.tokens
            .iter()
            .all(|token| fields.iter().any(|field| field.contains(token.as_str())))
    }

    pub fn apply(&self, products: impl IntoIterator<Item = Product>) -> Vec<Product> {
        let mut out: Vec<Product> = products.into_iter().filter(|p| self.matches(p)).collect();
        out.sort_by(|a, b| self.sort.compare(a, b));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::product::ProductDraft;
    use chrono::Utc;
    use labinv_core::ProductId;

    fn product(name: &str, brand: &str, model: &str, pm: bool) -> Product {
        Product::create(
            ProductId::new(),
            ProductDraft {
                name: name.into(),
                brand: brand.into(),
                model: model.into(),
                is_property_managed: pm,
                ..ProductDraft::default()
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn pm_filter_parsing() {
        assert_eq!(PmFilter::parse(Some("true")), PmFilter::Pm);
        assert_eq!(PmFilter::parse(Some("0")), PmFilter::NonPm);
        assert_eq!(PmFilter::parse(Some("whatever")), PmFilter::All);
        assert_eq!(PmFilter::parse(None), PmFilter::All);
    }

    #[test]
    fn keyword_matches_any_text_field_case_insensitively() {
        let p = product("Power Supply", "Keysight", "E36103B", true);
        assert!(ProductQuery::new(PmFilter::All, Some("keys")).matches(&p));
        assert!(ProductQuery::new(PmFilter::All, Some("e361")).matches(&p));
        assert!(!ProductQuery::new(PmFilter::NonPm, Some("keys")).matches(&p));
        assert!(!ProductQuery::new(PmFilter::All, Some("resistor")).matches(&p));
    }

    fn priced(name: &str, price: Option<f64>) -> Product {
        let mut p = product(name, "Brand", name, false);
        p.price = price;
        p
    }

    fn names(list: &[Product]) -> Vec<&str> {
        list.iter().map(|p| p.name.as_str()).collect()
    }

    #[test]
    fn every_keyword_must_match_some_field() {
        let p = product("Power Supply", "Keysight", "E36103B", true);
        assert!(ProductQuery::new(PmFilter::All, Some("keysight  e361")).matches(&p));
        assert!(ProductQuery::new(PmFilter::All, Some("supply E36103B")).matches(&p));
        assert!(!ProductQuery::new(PmFilter::All, Some("keysight scope")).matches(&p));
        assert!(ProductQuery::new(PmFilter::All, Some("   ")).matches(&p));
    }

    #[test]
    fn sort_parsing_falls_back_to_brand_ascending() {
        assert_eq!(ProductSort::parse(None, None), ProductSort::default());
        assert_eq!(
            ProductSort::parse(Some("PRICE"), Some("desc")),
            ProductSort { by: SortBy::Price, dir: SortDir::Desc }
        );
        assert_eq!(
            ProductSort::parse(Some("weight"), Some("sideways")),
            ProductSort { by: SortBy::Brand, dir: SortDir::Asc }
        );
    }

    #[test]
    fn name_sort_breaks_ties_by_brand_then_model() {
        let list = vec![
            product("b", "Zeta", "1", false),
            product("a", "beta", "2", false),
            product("A", "alpha", "2", false),
            product("c", "alpha", "1", false),
        ];
        let sort = ProductSort::parse(Some("name"), None);
        let sorted = ProductQuery::default().sorted(sort).apply(list);
        assert_eq!(names(&sorted), ["A", "a", "b", "c"]);
    }

    #[test]
    fn default_order_is_brand_model_name() {
        let list = vec![
            product("b", "Zeta", "1", false),
            product("z", "alpha", "2", false),
            product("a", "Alpha", "2", false),
            product("m", "alpha", "1", false),
        ];
        let sorted = ProductQuery::default().apply(list);
        assert_eq!(names(&sorted), ["m", "a", "z", "b"]);
    }

    #[test]
    fn missing_prices_trail_ascending_and_lead_descending() {
        let list = vec![
            priced("mid", Some(20.0)),
            priced("none", None),
            priced("cheap", Some(5.5)),
            priced("dear", Some(120.0)),
        ];
        let asc = ProductQuery::default()
            .sorted(ProductSort::parse(Some("price"), Some("asc")))
            .apply(list.clone());
        assert_eq!(names(&asc), ["cheap", "mid", "dear", "none"]);

        let desc = ProductQuery::default()
            .sorted(ProductSort::parse(Some("price"), Some("desc")))
            .apply(list);
        assert_eq!(names(&desc), ["none", "dear", "mid", "cheap"]);
    }

    #[test]
    fn equal_keys_put_newest_first() {
        let older = product("Same", "Brand", "X", false);
        let mut newer = older.clone();
        newer.id = ProductId::new();
        newer.created_at = older.created_at + chrono::Duration::seconds(5);
        let sorted = ProductQuery::default().apply(vec![older.clone(), newer.clone()]);
        assert_eq!(sorted[0].id, newer.id);
        assert_eq!(sorted[1].id, older.id);
    }

    proptest::proptest! {
        #[test]
        fn filter_never_admits_the_other_kind(flags in proptest::collection::vec(proptest::bool::ANY, 0..20)) {
            let list: Vec<Product> = flags
                .iter()
                .enumerate()
                .map(|(i, pm)| product(&format!("p{i}"), "Brand", &format!("M{i}"), *pm))
                .collect();
            let pm = ProductQuery::new(PmFilter::Pm, None).apply(list.clone());
            let non_pm = ProductQuery::new(PmFilter::NonPm, None).apply(list.clone());
            proptest::prop_assert!(pm.iter().all(|p| p.is_property_managed));
            proptest::prop_assert!(non_pm.iter().all(|p| !p.is_property_managed));
            proptest::prop_assert_eq!(pm.len() + non_pm.len(), list.len());
        }
    }
}
