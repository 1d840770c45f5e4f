//! Fact records as served by the API and their flat display projection

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::error::ConsultError;

// =============================================================================
// Wire Types
// =============================================================================

/// Fact (sales invoice) as returned by the API
#[derive(Debug, Clone, Deserialize)]
pub struct RawRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub cod_fact: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub client: Option<RawClient>,
    #[serde(default)]
    pub user: Option<RawUser>,
    pub payment_type: String,
    pub way_to_pay: String,
    pub subtotal: f64,
    #[serde(default)]
    pub discount: f64,
    pub status: String,
    #[serde(default)]
    pub customer_payment: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawClient {
    pub name: String,
    #[serde(default)]
    pub lastname: String,
}

/// Seller who issued the fact
#[derive(Debug, Clone, Deserialize)]
pub struct RawUser {
    pub name: String,
    #[serde(default)]
    pub lastname: String,
    #[serde(default)]
    pub area: Option<AreaRef>,
}

/// Area reference: a bare id, or the populated area document
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum AreaRef {
    Id(String),
    Populated {
        #[serde(rename = "_id")]
        id: String,
        name: String,
    },
}

impl AreaRef {
    pub fn id(&self) -> &str {
        match self {
            AreaRef::Id(id) => id,
            AreaRef::Populated { id, .. } => id,
        }
    }
}

// =============================================================================
// Normalized Records
// =============================================================================

/// Flat projection of a fact used by the tables and the export
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub id: String,
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub client: String,
    pub user: String,
    pub area: Option<AreaRef>,
    pub payment_type: String,
    pub way_to_pay: String,
    gross_subtotal: f64,
    pub discount: f64,
    pub status: String,
    pub customer_payment: f64,
}

impl NormalizedRecord {
    /// Subtotal minus discount. Derived on every call so the discount is
    /// applied exactly once no matter how the record is sorted or copied.
    pub fn net_amount(&self) -> f64 {
        self.gross_subtotal - self.discount
    }

    pub fn area_id(&self) -> Option<&str> {
        self.area.as_ref().map(AreaRef::id)
    }

    /// Value of a column, typed for sorting and export
    pub fn value(&self, field: FactField) -> FieldValue {
        match field {
            FactField::Code => FieldValue::Text(self.code.clone()),
            FactField::CreatedAt => FieldValue::Text(
                self.created_at
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
            FactField::Client => FieldValue::Text(self.client.clone()),
            FactField::User => FieldValue::Text(self.user.clone()),
            FactField::Area => match &self.area {
                Some(AreaRef::Populated { name, .. }) => FieldValue::Object { name: name.clone() },
                Some(AreaRef::Id(id)) => FieldValue::Text(id.clone()),
                None => FieldValue::Text(String::new()),
            },
            FactField::PaymentType => FieldValue::Text(self.payment_type.clone()),
            FactField::WayToPay => FieldValue::Text(self.way_to_pay.clone()),
            FactField::Subtotal => FieldValue::Number(self.net_amount()),
            FactField::Discount => FieldValue::Number(self.discount),
            FactField::Status => FieldValue::Text(self.status.clone()),
            FactField::CustomerPayment => FieldValue::Number(self.customer_payment),
        }
    }
}

/// Normalize a batch of facts, preserving order.
///
/// The first fact without a client or a user aborts the whole batch; a
/// partially normalized result is never returned.
pub fn normalize_records(raw: &[RawRecord]) -> Result<Vec<NormalizedRecord>, ConsultError> {
    raw.iter()
        .enumerate()
        .map(|(index, record)| normalize_record(index, record))
        .collect()
}

fn normalize_record(index: usize, raw: &RawRecord) -> Result<NormalizedRecord, ConsultError> {
    let malformed = |missing| ConsultError::MalformedRecord {
        index,
        id: raw.id.clone(),
        missing,
    };
    let client = raw.client.as_ref().ok_or_else(|| malformed("client"))?;
    let user = raw.user.as_ref().ok_or_else(|| malformed("user"))?;

    Ok(NormalizedRecord {
        id: raw.id.clone(),
        code: raw.cod_fact.clone(),
        created_at: raw.created_at,
        client: full_name(&client.name, &client.lastname),
        user: full_name(&user.name, &user.lastname),
        area: user.area.clone(),
        payment_type: raw.payment_type.clone(),
        way_to_pay: raw.way_to_pay.clone(),
        gross_subtotal: raw.subtotal,
        discount: raw.discount,
        status: raw.status.clone(),
        customer_payment: raw.customer_payment,
    })
}

fn full_name(name: &str, lastname: &str) -> String {
    format!("{} {}", name, lastname)
}

// =============================================================================
// Fields
// =============================================================================

/// Columns of a normalized fact (keys match the API field names)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FactField {
    Code,
    CreatedAt,
    Client,
    User,
    Area,
    PaymentType,
    WayToPay,
    /// Net amount (subtotal - discount)
    Subtotal,
    Discount,
    Status,
    CustomerPayment,
}

impl FactField {
    pub const ALL: [FactField; 11] = [
        FactField::Code,
        FactField::CreatedAt,
        FactField::Client,
        FactField::User,
        FactField::Area,
        FactField::PaymentType,
        FactField::WayToPay,
        FactField::Subtotal,
        FactField::Discount,
        FactField::Status,
        FactField::CustomerPayment,
    ];

    pub fn key(self) -> &'static str {
        match self {
            FactField::Code => "cod_fact",
            FactField::CreatedAt => "createdAt",
            FactField::Client => "client",
            FactField::User => "user",
            FactField::Area => "area",
            FactField::PaymentType => "payment_type",
            FactField::WayToPay => "way_to_pay",
            FactField::Subtotal => "subtotal",
            FactField::Discount => "discount",
            FactField::Status => "status",
            FactField::CustomerPayment => "customer_payment",
        }
    }
}

impl FromStr for FactField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FactField::ALL
            .into_iter()
            .find(|field| field.key() == s)
            .ok_or_else(|| {
                let keys: Vec<_> = FactField::ALL.iter().map(|f| f.key()).collect();
                format!("Unknown field '{}'. Valid: {}", s, keys.join(", "))
            })
    }
}

impl fmt::Display for FactField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Typed column value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Nested document, compared and shown by its name
    Object { name: String },
    Number(f64),
    Text(String),
}

impl FieldValue {
    /// Comparator used by the table sort: objects by name, numbers
    /// numerically, everything else as locale-aware text.
    pub fn compare(&self, other: &FieldValue) -> Ordering {
        match (self, other) {
            (FieldValue::Object { name: a }, FieldValue::Object { name: b }) => locale_compare(a, b),
            (FieldValue::Number(a), FieldValue::Number(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (a, b) => locale_compare(&a.to_string(), &b.to_string()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Object { name } => f.write_str(name),
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

/// Spanish-style text comparison.
///
/// Accents and case are ignored at first ("Ángel" sorts with "angel",
/// before "Beto") and ñ is its own letter right after n. Equal keys fall
/// back to the lowercase text and then the raw text, so the order is total.
pub fn locale_compare(a: &str, b: &str) -> Ordering {
    collation_key(a)
        .cmp(&collation_key(b))
        .then_with(|| a.to_lowercase().cmp(&b.to_lowercase()))
        .then_with(|| a.cmp(b))
}

/// Lowercase base letters with combining marks dropped. The flag marks ñ.
fn collation_key(s: &str) -> Vec<(char, bool)> {
    let mut key: Vec<(char, bool)> = Vec::with_capacity(s.len());
    for c in s.nfd() {
        if c == COMBINING_TILDE {
            if let Some(last) = key.last_mut().filter(|last| **last == ('n', false)) {
                last.1 = true;
                continue;
            }
        }
        if is_combining_mark(c) {
            continue;
        }
        key.extend(c.to_lowercase().map(|l| (l, false)));
    }
    key
}

const COMBINING_TILDE: char = '\u{0303}';
