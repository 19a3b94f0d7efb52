use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use labinv_core::{DomainError, DomainResult, Entity, ProductId};

/// A catalogue product. `(brand, model)` identifies it uniquely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub brand: String,
    pub model: String,
    pub specifications: String,
    pub price: Option<f64>,
    pub image_link: Option<String>,
    pub local_image: Option<String>,
    pub is_property_managed: bool,
    pub created_at: DateTime<Utc>,
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Writable product fields, as accepted by create and update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProductDraft {
    pub name: String,
    pub brand: String,
    pub model: String,
    pub specifications: String,
    pub price: Option<f64>,
    pub image_link: Option<String>,
    pub is_property_managed: bool,
}

impl ProductDraft {
    /// Trim text fields and check the basic shape.
    pub fn validate(mut self) -> DomainResult<Self> {
        self.name = self.name.trim().to_string();
        self.brand = self.brand.trim().to_string();
        self.model = self.model.trim().to_string();
        self.specifications = self.specifications.trim().to_string();
        self.image_link = self
            .image_link
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());

        if self.name.is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if let Some(price) = self.price {
            if !price.is_finite() || price < 0.0 {
                return Err(DomainError::validation("price must be a non-negative number"));
            }
        }
        Ok(self)
    }
}

impl Product {
    pub fn create(id: ProductId, draft: ProductDraft, now: DateTime<Utc>) -> DomainResult<Self> {
        let draft = draft.validate()?;
        Ok(Self {
            id,
            name: draft.name,
            brand: draft.brand,
            model: draft.model,
            specifications: draft.specifications,
            price: draft.price,
            image_link: draft.image_link,
            local_image: None,
            is_property_managed: draft.is_property_managed,
            created_at: now,
        })
    }

    /// Overwrite the writable fields. The PM flag is frozen once stock exists.
    pub fn update(&mut self, draft: ProductDraft, has_stock: bool) -> DomainResult<()> {
        let draft = draft.validate()?;
        if has_stock && draft.is_property_managed != self.is_property_managed {
            return Err(DomainError::conflict(
                "cannot change property-managed flag while stock exists",
            ));
        }
        if self.image_link != draft.image_link {
            self.local_image = None;
        }
        self.name = draft.name;
        self.brand = draft.brand;
        self.model = draft.model;
        self.specifications = draft.specifications;
        self.price = draft.price;
        self.image_link = draft.image_link;
        self.is_property_managed = draft.is_property_managed;
        Ok(())
    }

    /// Whether `other` would collide with this product on `(brand, model)`.
    pub fn collides_with(&self, brand: &str, model: &str) -> bool {
        self.brand == brand && self.model == model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> ProductDraft {
        ProductDraft {
            name: " Oscilloscope ".into(),
            brand: "Tek".into(),
            model: "TBS1052".into(),
            is_property_managed: true,
            ..ProductDraft::default()
        }
    }

    #[test]
    fn create_trims_fields() {
        let p = Product::create(ProductId::new(), draft(), Utc::now()).unwrap();
        assert_eq!(p.name, "Oscilloscope");
        assert!(p.is_property_managed);
    }

    #[test]
    fn create_rejects_empty_name() {
        let err = Product::create(
            ProductId::new(),
            ProductDraft {
                name: "   ".into(),
                ..draft()
            },
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn negative_price_is_rejected() {
        let err = ProductDraft {
            price: Some(-1.0),
            ..draft()
        }
        .validate()
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn pm_flag_is_frozen_while_stock_exists() {
        let mut p = Product::create(ProductId::new(), draft(), Utc::now()).unwrap();
        let err = p
            .update(
                ProductDraft {
                    is_property_managed: false,
                    ..draft()
                },
                true,
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));

        p.update(
            ProductDraft {
                is_property_managed: false,
                ..draft()
            },
            false,
        )
        .unwrap();
        assert!(!p.is_property_managed);
    }

    #[test]
    fn changing_image_link_drops_cached_local_image() {
        let mut p = Product::create(ProductId::new(), draft(), Utc::now()).unwrap();
        p.local_image = Some("abc.jpg".into());
        p.update(
            ProductDraft {
                image_link: Some("https://img.example/x.png".into()),
                ..draft()
            },
            false,
        )
        .unwrap();
        assert_eq!(p.local_image, None);
    }
}
