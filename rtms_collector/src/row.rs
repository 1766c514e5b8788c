use std::collections::HashMap;
use std::fmt::Display;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
}

impl Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Text(s) => write!(f, "{s}"),
            FieldValue::Integer(n) => write!(f, "{n}"),
        }
    }
}

/// One reported transaction: the item's child elements in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionRow {
    fields: Vec<(String, Option<FieldValue>)>,
}

impl TransactionRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field, replacing the value if the key already exists.
    pub fn insert(&mut self, key: impl Into<String>, value: Option<FieldValue>) {
        let key = key.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn insert_text(&mut self, key: impl Into<String>, value: Option<String>) {
        self.insert(key, value.map(FieldValue::Text));
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.iter().any(|(k, _)| k == key)
    }

    /// `None` when the field is absent, `Some(None)` when it is present but empty.
    pub fn get(&self, key: &str) -> Option<Option<&FieldValue>> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_ref())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn rename(&mut self, from: &str, to: &str) {
        if from == to || self.contains_key(to) {
            return;
        }
        if let Some((k, _)) = self.fields.iter_mut().find(|(k, _)| k == from) {
            *k = to.to_string();
        }
    }
}

impl<K: Into<String>> FromIterator<(K, Option<String>)> for TransactionRow {
    fn from_iter<T: IntoIterator<Item = (K, Option<String>)>>(iter: T) -> Self {
        let mut row = TransactionRow::new();
        for (k, v) in iter {
            row.insert_text(k, v);
        }
        row
    }
}

impl Serialize for TransactionRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Amount fields of the current and the legacy endpoint, in 만원.
pub const AMOUNT_FIELDS: [&str; 2] = ["dealAmount", "거래금액"];

static AMOUNT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d{1,3}(,\d{3})*$|^-?\d+$").unwrap());

/// Current endpoint tag → label the legacy endpoint and the spreadsheet users know.
static DISPLAY_LABELS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("sggCd", "지역코드"),
        ("umdCd", "법정동읍면동코드"),
        ("landCd", "법정동지번코드"),
        ("bonbun", "법정동본번코드"),
        ("bubun", "법정동부번코드"),
        ("roadNm", "도로명"),
        ("roadNmSggCd", "도로명시군구코드"),
        ("roadNmCd", "도로명코드"),
        ("roadNmSeq", "도로명일련번호코드"),
        ("roadNmbCd", "도로명지상지하코드"),
        ("roadNmBonbun", "도로명건물본번호코드"),
        ("roadNmBubun", "도로명건물부번호코드"),
        ("umdNm", "법정동"),
        ("aptNm", "아파트"),
        ("jibun", "지번"),
        ("excluUseAr", "전용면적"),
        ("dealYear", "년"),
        ("dealMonth", "월"),
        ("dealDay", "일"),
        ("dealAmount", "거래금액"),
        ("floor", "층"),
        ("buildYear", "건축년도"),
        ("aptSeq", "단지일련번호"),
        ("cdealType", "해제여부"),
        ("cdealDay", "해제사유발생일"),
        ("dealingGbn", "거래유형"),
        ("estateAgentSggNm", "중개사소재지"),
        ("rgstDate", "등기일자"),
        ("aptDong", "아파트동명"),
        ("slerGbn", "매도자"),
        ("buyerGbn", "매수자"),
        ("landLeaseholdGbn", "토지임대부아파트여부"),
    ])
});

pub fn display_label(key: &str) -> Option<&'static str> {
    DISPLAY_LABELS.get(key).copied()
}

/// Parses "82,500" (or "  82500 ") into an integer.
pub fn parse_amount(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if !AMOUNT_RE.is_match(raw) {
        return None;
    }
    raw.replace(',', "").parse().ok()
}

/// Turns the amount field into an integer. Rows without the field, or with a
/// value that is not a grouped number, are left as they are.
pub fn coerce_amount(row: &mut TransactionRow) -> bool {
    for key in AMOUNT_FIELDS {
        let amount = match row.get(key) {
            Some(Some(FieldValue::Text(raw))) => parse_amount(raw),
            _ => None,
        };
        if let Some(amount) = amount {
            row.insert(key, Some(FieldValue::Integer(amount)));
            return true;
        }
    }
    false
}

pub fn apply_display_labels(row: &mut TransactionRow) {
    let keys: Vec<String> = row.keys().map(str::to_string).collect();
    for key in keys {
        if let Some(label) = display_label(&key) {
            row.rename(&key, label);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostProcess {
    pub coerce_amounts: bool,
    pub display_labels: bool,
}

impl Default for PostProcess {
    fn default() -> Self {
        PostProcess {
            coerce_amounts: true,
            display_labels: true,
        }
    }
}

impl PostProcess {
    pub const RAW: PostProcess = PostProcess {
        coerce_amounts: false,
        display_labels: false,
    };

    pub fn apply(&self, rows: &mut [TransactionRow]) {
        for row in rows {
            if self.coerce_amounts {
                coerce_amount(row);
            }
            if self.display_labels {
                apply_display_labels(row);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fields: &[(&str, Option<&str>)]) -> TransactionRow {
        fields
            .iter()
            .map(|(k, v)| (*k, v.map(str::to_string)))
            .collect()
    }

    #[test]
    fn grouped_amount_becomes_integer() {
        let mut r = row(&[("aptNm", Some("래미안")), ("dealAmount", Some("1,234"))]);
        assert!(coerce_amount(&mut r));
        assert_eq!(r.get("dealAmount"), Some(Some(&FieldValue::Integer(1234))));
        assert_eq!(
            r.get("aptNm"),
            Some(Some(&FieldValue::Text("래미안".to_string())))
        );
    }

    #[test]
    fn legacy_padded_amount_is_coerced() {
        let mut r = row(&[("거래금액", Some("    82,500"))]);
        assert!(coerce_amount(&mut r));
        assert_eq!(r.get("거래금액"), Some(Some(&FieldValue::Integer(82500))));
    }

    #[test]
    fn missing_or_odd_amount_is_left_alone() {
        let mut absent = row(&[("aptNm", Some("자이"))]);
        let before = absent.clone();
        assert!(!coerce_amount(&mut absent));
        assert_eq!(absent, before);

        let mut empty = row(&[("dealAmount", None)]);
        assert!(!coerce_amount(&mut empty));
        assert_eq!(empty.get("dealAmount"), Some(None));

        let mut odd = row(&[("dealAmount", Some("12,34"))]);
        assert!(!coerce_amount(&mut odd));
    }

    #[test]
    fn parse_amount_accepts_plain_and_grouped() {
        assert_eq!(parse_amount("125000"), Some(125000));
        assert_eq!(parse_amount("1,250,000"), Some(1250000));
        assert_eq!(parse_amount("abc"), None);
        assert_eq!(parse_amount(""), None);
    }

    #[test]
    fn labels_rename_known_keys_in_place() {
        let mut r = row(&[
            ("aptNm", Some("래미안")),
            ("customTag", Some("x")),
            ("dealAmount", Some("1,000")),
        ]);
        PostProcess::default().apply(std::slice::from_mut(&mut r));
        let keys: Vec<&str> = r.keys().collect();
        assert_eq!(keys, ["아파트", "customTag", "거래금액"]);
        assert_eq!(r.get("거래금액"), Some(Some(&FieldValue::Integer(1000))));
    }

    #[test]
    fn raw_post_process_changes_nothing() {
        let mut rows = vec![row(&[("dealAmount", Some("1,000"))])];
        let before = rows.clone();
        PostProcess::RAW.apply(&mut rows);
        assert_eq!(rows, before);
    }

    #[test]
    fn rename_never_clobbers_an_existing_key() {
        let mut r = row(&[("dealAmount", Some("1")), ("거래금액", Some("2"))]);
        r.rename("dealAmount", "거래금액");
        assert_eq!(r.keys().collect::<Vec<_>>(), ["dealAmount", "거래금액"]);
    }

    #[test]
    fn serializes_as_ordered_map() {
        let mut r = row(&[("b", Some("1,000")), ("a", None)]);
        r.insert("b", Some(FieldValue::Integer(1000)));
        assert_eq!(serde_json::to_string(&r).unwrap(), r#"{"b":1000,"a":null}"#);
    }
}
