//! Typed views of the storefront collections.

use crate::error::Result;
use crate::Error;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Collection holding products.
pub const PRODUCTS: &str = "products";
/// Collection holding customers.
pub const CUSTOMERS: &str = "customers";

/// A typed record stored in a fixed collection.
pub trait Document: Serialize + DeserializeOwned + Send + Sync {
    /// Collection the record lives in.
    const COLLECTION: &'static str;

    /// Presence check run before every write.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Invalid(format!("{field} is required")));
    }
    Ok(())
}

/// A product variant (size, colour, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductVariant {
    pub id: String,
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku_suffix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_price: Option<f64>,
    #[serde(default)]
    pub stock: i64,
}

/// A product image reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductImage {
    pub id: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
    #[serde(default)]
    pub is_thumbnail: bool,
}

/// A catalog product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_price: Option<f64>,
    #[serde(default)]
    pub stock: i64,
    #[serde(default)]
    pub sku: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barcode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplier_id: Option<String>,
    #[serde(default)]
    pub icon: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub images: Vec<ProductImage>,
    #[serde(default)]
    pub variants: Vec<ProductVariant>,
    #[serde(default = "active_by_default")]
    pub is_active: bool,
}

fn active_by_default() -> bool {
    true
}

impl Document for Product {
    const COLLECTION: &'static str = PRODUCTS;

    fn validate(&self) -> Result<()> {
        require("product name", &self.name)?;
        require("SKU", &self.sku)
    }
}

/// A postal address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
}

/// A customer profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loyalty_points: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_purchase_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Customer {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

impl Document for Customer {
    const COLLECTION: &'static str = CUSTOMERS;

    fn validate(&self) -> Result<()> {
        require("first name", &self.first_name)?;
        require("last name", &self.last_name)?;
        require("email", &self.email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn widget() -> Product {
        serde_json::from_value(json!({
            "name": "Widget",
            "price": 9.99,
            "sku": "W-1"
        }))
        .unwrap()
    }

    #[test]
    fn product_defaults() {
        let product = widget();
        assert!(product.is_active);
        assert_eq!(product.stock, 0);
        assert!(product.variants.is_empty());
        assert!(product.validate().is_ok());
    }

    #[test]
    fn product_serializes_camel_case() {
        let mut product = widget();
        product.cost_price = Some(4.0);
        let value = serde_json::to_value(&product).unwrap();
        assert_eq!(value["costPrice"], json!(4.0));
        assert_eq!(value["isActive"], json!(true));
        assert!(value.get("barcode").is_none());
    }

    #[test]
    fn product_requires_name_and_sku() {
        let mut product = widget();
        product.name = "  ".into();
        assert_eq!(
            product.validate(),
            Err(Error::Invalid("product name is required".into()))
        );

        let mut product = widget();
        product.sku.clear();
        assert!(product.validate().is_err());
    }

    #[test]
    fn customer_requires_names_and_email() {
        let customer: Customer = serde_json::from_value(json!({
            "firstName": "Alice",
            "lastName": "Smith",
            "email": ""
        }))
        .unwrap();
        assert_eq!(
            customer.validate(),
            Err(Error::Invalid("email is required".into()))
        );
        assert_eq!(customer.full_name(), "Alice Smith");
    }

    #[test]
    fn customer_address_round_trip() {
        let value = json!({
            "firstName": "Alice",
            "lastName": "Smith",
            "email": "alice@example.com",
            "address": {
                "street": "123 Main St",
                "city": "Anytown",
                "state": "CA",
                "zipCode": "90210",
                "country": "USA"
            }
        });
        let customer: Customer = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(customer.address.as_ref().unwrap().zip_code, "90210");
        assert_eq!(serde_json::to_value(&customer).unwrap(), value);
    }
}
