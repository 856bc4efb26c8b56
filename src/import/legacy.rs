//! Decoding of the legacy flat-file inventory document.
//!
//! The document is a JSON object with optional `stores`, `categories`,
//! `products` and `store_products` arrays. Prices can also be nested under
//! each product. Records are decoded one at a time; a record that fails to
//! decode or validate lands in [`LegacyDocument::rejected`] instead of
//! failing the whole document.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, ShelfError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Store,
    Category,
    Product,
    Price,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Store => "store",
            Self::Category => "category",
            Self::Product => "product",
            Self::Price => "price",
        })
    }
}

/// A record left out of the migration, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRecord {
    pub kind: RecordKind,
    pub key: String,
    pub reason: String,
}

impl SkippedRecord {
    pub fn new(kind: RecordKind, key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
            reason: reason.into(),
        }
    }
}

impl From<SkippedRecord> for ShelfError {
    fn from(record: SkippedRecord) -> Self {
        Self::MalformedRecord {
            kind: record.kind.to_string(),
            key: record.key,
            reason: record.reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyStore {
    pub name: String,
    pub location: Option<String>,
    pub website: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyProduct {
    pub name: String,
    pub category: Option<String>,
    pub brands: Vec<String>,
    pub synonyms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LegacyPrice {
    pub store: String,
    pub product: String,
    pub unit: String,
    pub price: f64,
    pub in_stock: bool,
    pub last_updated: Option<String>,
}

impl LegacyPrice {
    /// Idempotence key: `store|product|unit`, trimmed and lowercased.
    pub fn source_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.store.trim().to_lowercase(),
            self.product.trim().to_lowercase(),
            self.unit.trim().to_lowercase()
        )
    }
}

/// Everything decoded from one legacy file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegacyDocument {
    pub stores: Vec<LegacyStore>,
    pub categories: Vec<String>,
    pub products: Vec<LegacyProduct>,
    pub prices: Vec<LegacyPrice>,
    pub rejected: Vec<SkippedRecord>,
}

#[derive(Deserialize)]
struct RawStore {
    name: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    website: Option<String>,
}

#[derive(Deserialize)]
struct RawCategory {
    name: String,
}

#[derive(Deserialize)]
struct RawProduct {
    name: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    brands: Vec<String>,
    #[serde(default)]
    synonyms: Vec<String>,
    #[serde(default)]
    prices: Vec<Value>,
}

/// Nested under a product, so the product is implied.
#[derive(Deserialize)]
struct RawPrice {
    store: String,
    price: PriceValue,
    unit: String,
    #[serde(default = "default_in_stock")]
    in_stock: bool,
    #[serde(default)]
    last_updated: Option<String>,
}

#[derive(Deserialize)]
struct RawStoreProduct {
    product: String,
    #[serde(flatten)]
    price: RawPrice,
}

/// Older exports wrote prices as strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum PriceValue {
    Number(f64),
    Text(String),
}

const fn default_in_stock() -> bool {
    true
}

impl LegacyDocument {
    /// Decode a legacy document. Only a document that is not JSON, or not
    /// a JSON object, is an error.
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|err| ShelfError::SourceUnreadable(format!("not valid JSON: {err}")))?;
        let Value::Object(root) = value else {
            return Err(ShelfError::ValidationFailed(
                "legacy document must be a JSON object".to_string(),
            ));
        };

        let mut doc = Self::default();
        for (idx, item) in array(&root, "stores", &mut doc.rejected)
            .into_iter()
            .enumerate()
        {
            match decode_store(item) {
                Ok(store) => doc.stores.push(store),
                Err(reason) => doc.reject(RecordKind::Store, item, idx, reason),
            }
        }
        for (idx, item) in array(&root, "categories", &mut doc.rejected)
            .into_iter()
            .enumerate()
        {
            match decode::<RawCategory>(item).and_then(|raw| required("name", &raw.name)) {
                Ok(name) => doc.categories.push(name),
                Err(reason) => doc.reject(RecordKind::Category, item, idx, reason),
            }
        }
        for (idx, item) in array(&root, "products", &mut doc.rejected)
            .into_iter()
            .enumerate()
        {
            match decode_product(item) {
                Ok((product, prices)) => {
                    for (price_idx, price) in prices.iter().enumerate() {
                        let decoded = decode::<RawPrice>(price)
                            .and_then(|raw| finish_price(&product.name, raw));
                        match decoded {
                            Ok(price) => doc.prices.push(price),
                            Err(reason) => doc.rejected.push(SkippedRecord::new(
                                RecordKind::Price,
                                format!("{}#{price_idx}", product.name),
                                reason,
                            )),
                        }
                    }
                    doc.products.push(product);
                }
                Err(reason) => doc.reject(RecordKind::Product, item, idx, reason),
            }
        }
        for (idx, item) in array(&root, "store_products", &mut doc.rejected)
            .into_iter()
            .enumerate()
        {
            let decoded = decode::<RawStoreProduct>(item)
                .and_then(|raw| finish_price(&raw.product, raw.price));
            match decoded {
                Ok(price) => doc.prices.push(price),
                Err(reason) => doc.reject(RecordKind::Price, item, idx, reason),
            }
        }
        Ok(doc)
    }

    fn reject(&mut self, kind: RecordKind, item: &Value, idx: usize, reason: String) {
        let key = item
            .get("name")
            .or_else(|| item.get("product"))
            .and_then(Value::as_str)
            .filter(|name| !name.trim().is_empty())
            .map_or_else(|| format!("#{idx}"), |name| name.trim().to_string());
        self.rejected.push(SkippedRecord::new(kind, key, reason));
    }
}

fn array<'a>(
    root: &'a serde_json::Map<String, Value>,
    field: &str,
    rejected: &mut Vec<SkippedRecord>,
) -> Vec<&'a Value> {
    match root.get(field) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(_) => {
            rejected.push(SkippedRecord::new(
                RecordKind::from_field(field),
                field,
                "expected an array",
            ));
            Vec::new()
        }
    }
}

impl RecordKind {
    fn from_field(field: &str) -> Self {
        match field {
            "stores" => Self::Store,
            "categories" => Self::Category,
            "products" => Self::Product,
            _ => Self::Price,
        }
    }
}

fn decode<T: for<'de> Deserialize<'de>>(item: &Value) -> std::result::Result<T, String> {
    T::deserialize(item).map_err(|err| err.to_string())
}

fn required(field: &str, value: &str) -> std::result::Result<String, String> {
    let value = value.trim();
    if value.is_empty() {
        Err(format!("{field} is empty"))
    } else {
        Ok(value.to_string())
    }
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn decode_store(item: &Value) -> std::result::Result<LegacyStore, String> {
    let raw: RawStore = decode(item)?;
    Ok(LegacyStore {
        name: required("name", &raw.name)?,
        location: optional(raw.location),
        website: optional(raw.website),
    })
}

fn decode_product(item: &Value) -> std::result::Result<(LegacyProduct, Vec<Value>), String> {
    let raw: RawProduct = decode(item)?;
    let product = LegacyProduct {
        name: required("name", &raw.name)?,
        category: optional(raw.category),
        brands: raw.brands,
        synonyms: raw.synonyms,
    };
    Ok((product, raw.prices))
}

fn finish_price(product: &str, raw: RawPrice) -> std::result::Result<LegacyPrice, String> {
    let price = match raw.price {
        PriceValue::Number(value) => value,
        PriceValue::Text(text) => text
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("price {text:?} is not a number"))?,
    };
    if !price.is_finite() {
        return Err("price is not finite".to_string());
    }
    if price < 0.0 {
        return Err(format!("price {price} is negative"));
    }
    Ok(LegacyPrice {
        store: required("store", &raw.store)?,
        product: required("product", product)?,
        unit: required("unit", &raw.unit)?,
        price,
        in_stock: raw.in_stock,
        last_updated: optional(raw.last_updated),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_nested_and_flat_prices() {
        let doc = LegacyDocument::parse(
            r#"{
                "stores": [{"name": " Fresh Mart ", "location": "Main St"}],
                "categories": [{"name": "Dairy"}],
                "products": [{
                    "name": "Milk",
                    "category": "Dairy",
                    "brands": ["Arla"],
                    "prices": [{"store": "Fresh Mart", "price": 1.5, "unit": "l"}]
                }],
                "store_products": [
                    {"store": "Fresh Mart", "product": "Milk", "price": "2.75", "unit": "2l", "in_stock": false}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(doc.stores[0].name, "Fresh Mart");
        assert_eq!(doc.categories, vec!["Dairy".to_string()]);
        assert_eq!(doc.products[0].category.as_deref(), Some("Dairy"));
        assert_eq!(doc.prices.len(), 2);
        assert!(doc.prices[0].in_stock);
        assert!(!doc.prices[1].in_stock);
        assert!((doc.prices[1].price - 2.75).abs() < f64::EPSILON);
        assert!(doc.rejected.is_empty());
    }

    #[test]
    fn malformed_records_are_rejected_individually() {
        let doc = LegacyDocument::parse(
            r#"{
                "stores": [{"name": ""}, {"location": "nowhere"}, {"name": "Ok"}],
                "products": [{"name": "Eggs", "prices": [
                    {"store": "Ok", "price": -1, "unit": "dozen"},
                    {"store": "Ok", "price": 2, "unit": " "},
                    {"store": "Ok", "price": 2, "unit": "dozen"}
                ]}],
                "store_products": [{"store": "Ok", "product": "Eggs", "price": "cheap", "unit": "each"}]
            }"#,
        )
        .unwrap();

        assert_eq!(doc.stores.len(), 1);
        assert_eq!(doc.prices.len(), 1);
        assert_eq!(doc.rejected.len(), 5);
        assert_eq!(doc.rejected[0].key, "#0");
        assert_eq!(doc.rejected[0].reason, "name is empty");
        assert!(doc.rejected.iter().any(|r| r.key == "Eggs#0" && r.reason.contains("negative")));
        assert!(doc.rejected.iter().any(|r| r.reason == "unit is empty"));
        assert!(doc
            .rejected
            .iter()
            .any(|r| r.kind == RecordKind::Price && r.key == "Eggs" && r.reason.contains("cheap")));
    }

    #[test]
    fn non_object_documents_fail() {
        assert!(matches!(
            LegacyDocument::parse("[1, 2]"),
            Err(ShelfError::ValidationFailed(_))
        ));
        assert!(matches!(
            LegacyDocument::parse("{nope"),
            Err(ShelfError::SourceUnreadable(_))
        ));
        assert_eq!(LegacyDocument::parse("{}").unwrap(), LegacyDocument::default());
    }

    #[test]
    fn wrong_section_type_is_reported() {
        let doc = LegacyDocument::parse(r#"{"stores": {"name": "x"}}"#).unwrap();
        assert_eq!(
            doc.rejected,
            vec![SkippedRecord::new(RecordKind::Store, "stores", "expected an array")]
        );
    }

    #[test]
    fn source_key_is_normalized() {
        let price = LegacyPrice {
            store: " Fresh MART".to_string(),
            product: "Milk ".to_string(),
            unit: "L".to_string(),
            price: 1.0,
            in_stock: true,
            last_updated: None,
        };
        assert_eq!(price.source_key(), "fresh mart|milk|l");
    }
}
