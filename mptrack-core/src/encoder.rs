//! Event parameter encoding for the measurement protocol
//!
//! Turns an [`EventParams`] bag into wire fields on a [`WireQuery`]:
//!
//! ```text
//! page_location / page_title  →  dl / dt
//! items[N-1]                  →  prN   (tilde-delimited item token)
//! anything else               →  ep.{key}
//! ```
//!
//! ## Item tokens
//!
//! Each line item becomes a compact token such as `idA1~nmTee~pr1299~qt2`.
//! Fields appear in a fixed order (`id nm br ca va pr qt cp ds`) and only when
//! defined. On the wire the `~` separators stay literal while every field
//! value is form-encoded on its own, so a `~` inside a value is escaped and
//! cannot be mistaken for a separator.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::form_urlencoded;

/// Separator between fields of an item token
pub const ITEM_FIELD_DELIMITER: char = '~';

/// Parameter routed to `dl`
pub const PAGE_LOCATION: &str = "page_location";
/// Parameter routed to `dt`
pub const PAGE_TITLE: &str = "page_title";
/// Parameter holding the line-item array
pub const ITEMS: &str = "items";

/// Ordered parameter bag for one event
///
/// Keys are unique; inserting an existing key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventParams {
    entries: Vec<(String, Value)>,
}

impl EventParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a parameter
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Attach line items under `items`
    pub fn with_items(self, items: &[Item]) -> Self {
        let values = items
            .iter()
            .map(|item| serde_json::to_value(item).unwrap_or(Value::Null))
            .collect::<Vec<_>>();
        self.with(ITEMS, Value::Array(values))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for EventParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = EventParams::new();
        params.extend(iter);
        params
    }
}

impl<K: Into<String>, V: Into<Value>> Extend<(K, V)> for EventParams {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl IntoIterator for EventParams {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Scalar item field: prices and quantities arrive as numbers or strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemValue {
    Number(serde_json::Number),
    Text(String),
}

impl std::fmt::Display for ItemValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemValue::Number(n) => write!(f, "{}", n),
            ItemValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ItemValue {
    fn from(s: &str) -> Self {
        ItemValue::Text(s.to_string())
    }
}

impl From<String> for ItemValue {
    fn from(s: String) -> Self {
        ItemValue::Text(s)
    }
}

impl From<i64> for ItemValue {
    fn from(n: i64) -> Self {
        ItemValue::Number(n.into())
    }
}

impl From<u32> for ItemValue {
    fn from(n: u32) -> Self {
        ItemValue::Number(n.into())
    }
}

impl From<f64> for ItemValue {
    fn from(n: f64) -> Self {
        serde_json::Number::from_f64(n)
            .map(ItemValue::Number)
            .unwrap_or_else(|| ItemValue::Text(n.to_string()))
    }
}

/// One e-commerce line item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<ItemValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_name: Option<ItemValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_brand: Option<ItemValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_category: Option<ItemValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_variant: Option<ItemValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<ItemValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<ItemValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coupon: Option<ItemValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount: Option<ItemValue>,
}

impl Item {
    /// Item with just an ID
    pub fn new(item_id: impl Into<ItemValue>) -> Self {
        Self {
            item_id: Some(item_id.into()),
            ..Default::default()
        }
    }

    pub fn name(mut self, name: impl Into<ItemValue>) -> Self {
        self.item_name = Some(name.into());
        self
    }

    pub fn brand(mut self, brand: impl Into<ItemValue>) -> Self {
        self.item_brand = Some(brand.into());
        self
    }

    pub fn category(mut self, category: impl Into<ItemValue>) -> Self {
        self.item_category = Some(category.into());
        self
    }

    pub fn variant(mut self, variant: impl Into<ItemValue>) -> Self {
        self.item_variant = Some(variant.into());
        self
    }

    pub fn price(mut self, price: impl Into<ItemValue>) -> Self {
        self.price = Some(price.into());
        self
    }

    pub fn quantity(mut self, quantity: impl Into<ItemValue>) -> Self {
        self.quantity = Some(quantity.into());
        self
    }

    pub fn coupon(mut self, coupon: impl Into<ItemValue>) -> Self {
        self.coupon = Some(coupon.into());
        self
    }

    pub fn discount(mut self, discount: impl Into<ItemValue>) -> Self {
        self.discount = Some(discount.into());
        self
    }

    /// Defined fields as `(prefix, value)` in canonical token order
    fn prefixed_fields(&self) -> impl Iterator<Item = (&'static str, &ItemValue)> {
        [
            ("id", &self.item_id),
            ("nm", &self.item_name),
            ("br", &self.item_brand),
            ("ca", &self.item_category),
            ("va", &self.item_variant),
            ("pr", &self.price),
            ("qt", &self.quantity),
            ("cp", &self.coupon),
            ("ds", &self.discount),
        ]
        .into_iter()
        .filter_map(|(prefix, value)| value.as_ref().map(|v| (prefix, v)))
    }

    /// Serialize to an item token
    pub fn token(&self) -> ItemToken {
        ItemToken(
            self.prefixed_fields()
                .map(|(prefix, value)| format!("{}{}", prefix, value))
                .collect(),
        )
    }
}

/// Tilde-delimited encoding of one line item
///
/// `Display` shows the raw token (`idA1~pr1299~qt2`); [`encode`](Self::encode)
/// produces the wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemToken(Vec<String>);

impl ItemToken {
    /// Wire form: fields form-encoded individually, separators left literal
    pub fn encode(&self) -> String {
        let mut out = String::new();
        for (i, field) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(ITEM_FIELD_DELIMITER);
            }
            out.extend(form_urlencoded::byte_serialize(field.as_bytes()));
        }
        out
    }

    pub fn fields(&self) -> &[String] {
        &self.0
    }
}

impl std::fmt::Display for ItemToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let delimiter = ITEM_FIELD_DELIMITER.to_string();
        f.write_str(&self.0.join(delimiter.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum WireValue {
    Plain(String),
    Item(ItemToken),
}

/// Ordered query-string fields for one hit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireQuery {
    fields: Vec<(String, WireValue)>,
}

impl WireQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a plain field
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.push((key.into(), WireValue::Plain(value.into())));
    }

    /// Append an item token field
    pub fn push_item(&mut self, key: impl Into<String>, token: ItemToken) {
        self.fields.push((key.into(), WireValue::Item(token)));
    }

    /// First value for `key`, unencoded
    pub fn get(&self, key: &str) -> Option<String> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| match v {
                WireValue::Plain(s) => s.clone(),
                WireValue::Item(token) => token.to_string(),
            })
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.iter().any(|(k, _)| k == key)
    }

    /// Field keys in order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Serialize as `application/x-www-form-urlencoded`
    pub fn encode(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.fields {
            if !out.is_empty() {
                out.push('&');
            }
            out.extend(form_urlencoded::byte_serialize(key.as_bytes()));
            out.push('=');
            match value {
                WireValue::Plain(s) => out.extend(form_urlencoded::byte_serialize(s.as_bytes())),
                WireValue::Item(token) => out.push_str(&token.encode()),
            }
        }
        out
    }
}

/// String form of a parameter value: objects and arrays become JSON text
pub fn param_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Booleans, arrays and objects become their string form; numbers, strings
/// and nulls are kept as they are.
fn coerce_item_fields(value: &Value) -> Value {
    match value {
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(key, field)| {
                    let field = match field {
                        Value::Bool(_) | Value::Array(_) | Value::Object(_) => {
                            Value::String(param_string(field))
                        }
                        other => other.clone(),
                    };
                    (key.clone(), field)
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Line items from an `items` array; non-object entries are skipped
pub fn parse_items(values: &[Value]) -> Vec<Item> {
    values
        .iter()
        .enumerate()
        .filter_map(|(idx, value)| {
            if !value.is_object() {
                tracing::warn!(index = idx, "Skipping non-object line item");
                return None;
            }
            match Item::deserialize(&coerce_item_fields(value)) {
                Ok(item) => Some(item),
                Err(e) => {
                    tracing::warn!(index = idx, error = %e, "Skipping malformed line item");
                    None
                }
            }
        })
        .collect()
}

/// Append the wire fields for `params` to `query`
///
/// Emits `dl`/`dt` first, then `pr1..prN`, then `ep.*` in bag order.
pub fn encode_params(params: &EventParams, query: &mut WireQuery) {
    if let Some(location) = params.get(PAGE_LOCATION) {
        query.push("dl", param_string(location));
    }
    if let Some(title) = params.get(PAGE_TITLE) {
        query.push("dt", param_string(title));
    }

    let item_values = match params.get(ITEMS) {
        Some(Value::Array(values)) => Some(values),
        _ => None,
    };
    if let Some(values) = item_values {
        for (idx, item) in parse_items(values).iter().enumerate() {
            query.push_item(format!("pr{}", idx + 1), item.token());
        }
    }

    for (key, value) in params.iter() {
        let reserved = key == PAGE_LOCATION || key == PAGE_TITLE;
        let is_item_array = key == ITEMS && item_values.is_some();
        if reserved || is_item_array {
            continue;
        }
        query.push(format!("ep.{}", key), param_string(value));
    }
}
