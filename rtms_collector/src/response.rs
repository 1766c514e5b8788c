//! Reading the XML documents the transaction endpoints answer with.
//!
//! ```text
//! <response>
//!   <header><resultCode>000</resultCode><resultMsg>OK</resultMsg></header>
//!   <body>
//!     <items><item><aptNm>...</aptNm><dealAmount>82,500</dealAmount>...</item></items>
//!     <numOfRows>1000</numOfRows><pageNo>1</pageNo><totalCount>2</totalCount>
//!   </body>
//! </response>
//! ```
//!
//! The gateway in front of the API answers key and quota problems with an
//! `OpenAPI_ServiceResponse/cmmMsgHeader` document instead.

use std::fmt::Display;
use std::str::FromStr;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::ResponseError;
use crate::row::TransactionRow;

const ITEM: &str = "item";

/// How result signalling is read from a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResponseMode {
    /// `header/resultCode` decides success.
    #[default]
    Current,
    /// The old plaintext endpoint; the header is not trusted.
    Legacy,
}

impl Display for ResponseMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseMode::Current => write!(f, "current"),
            ResponseMode::Legacy => write!(f, "legacy"),
        }
    }
}

impl FromStr for ResponseMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "current" => Ok(ResponseMode::Current),
            "legacy" => Ok(ResponseMode::Legacy),
            other => Err(format!("unknown response mode {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedResponse {
    pub result_code: Option<String>,
    pub result_msg: Option<String>,
    pub total_count: Option<u64>,
    pub gateway_code: Option<String>,
    pub gateway_msg: Option<String>,
    pub items: Vec<TransactionRow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Rows {
        items: Vec<TransactionRow>,
        total_count: Option<u64>,
    },
    ApiError {
        code: String,
        message: String,
    },
}

pub fn is_success_code(code: &str) -> bool {
    let code = code.trim();
    !code.is_empty() && code.bytes().all(|b| b == b'0')
}

impl ParsedResponse {
    fn record_leaf(&mut self, name: &str, value: &str) {
        let value = value.trim();
        match name {
            "resultCode" => self.result_code = Some(value.to_string()),
            "resultMsg" => self.result_msg = Some(value.to_string()),
            "totalCount" => self.total_count = value.parse().ok(),
            "returnReasonCode" => self.gateway_code = Some(value.to_string()),
            "returnAuthMsg" => self.gateway_msg = Some(value.to_string()),
            "errMsg" if self.gateway_msg.is_none() => self.gateway_msg = Some(value.to_string()),
            _ => {}
        }
    }

    pub fn verdict(self, mode: ResponseMode) -> Result<Verdict, ResponseError> {
        if let Some(code) = self.gateway_code {
            return Ok(Verdict::ApiError {
                code,
                message: self.gateway_msg.unwrap_or_default(),
            });
        }
        if mode == ResponseMode::Current {
            match self.result_code {
                None => return Err(ResponseError::MissingHeader),
                Some(code) if !is_success_code(&code) => {
                    return Ok(Verdict::ApiError {
                        code,
                        message: self.result_msg.unwrap_or_default(),
                    })
                }
                Some(_) => {}
            }
        }
        Ok(Verdict::Rows {
            items: self.items,
            total_count: self.total_count,
        })
    }
}

fn tag_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

fn malformed(detail: impl Display) -> ResponseError {
    ResponseError::Malformed(detail.to_string())
}

/// Collects the header leaves and every `item` element. Each direct child of
/// an item becomes one field; an empty child is a null field.
pub fn parse_document(xml: &str) -> Result<ParsedResponse, ResponseError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut doc = ParsedResponse::default();
    let mut saw_element = false;
    let mut path: Vec<String> = Vec::new();
    // depth of the open item element and the row being filled
    let mut item: Option<(usize, TransactionRow)> = None;
    let mut text = String::new();

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                return Err(malformed(format_args!(
                    "at position {0}: {e}",
                    reader.error_position()
                )))
            }
        };
        match event {
            Event::Eof => break,
            Event::Start(e) => {
                saw_element = true;
                let name = tag_name(e.local_name().as_ref());
                if name == ITEM && item.is_none() {
                    item = Some((path.len(), TransactionRow::new()));
                }
                path.push(name);
                text.clear();
            }
            Event::Empty(e) => {
                saw_element = true;
                let name = tag_name(e.local_name().as_ref());
                match item.as_mut() {
                    Some((depth, row)) if path.len() == *depth + 1 => row.insert_text(name, None),
                    Some(_) => {}
                    None if name == ITEM => doc.items.push(TransactionRow::new()),
                    None => doc.record_leaf(&name, ""),
                }
            }
            Event::Text(e) => {
                let unescaped = e.unescape().map_err(malformed)?;
                text.push_str(&unescaped);
            }
            Event::CData(e) => text.push_str(&String::from_utf8_lossy(&e)),
            Event::End(_) => {
                let name = path
                    .pop()
                    .ok_or_else(|| malformed("end tag without a start tag"))?;
                let value = std::mem::take(&mut text);
                let item_depth = item.as_ref().map(|(depth, _)| *depth);
                match item_depth {
                    Some(depth) if path.len() == depth + 1 => {
                        if let Some((_, row)) = item.as_mut() {
                            let value = value.trim();
                            let value = (!value.is_empty()).then(|| value.to_string());
                            row.insert_text(name, value);
                        }
                    }
                    Some(depth) if path.len() == depth => {
                        if let Some((_, row)) = item.take() {
                            doc.items.push(row);
                        }
                    }
                    Some(_) => {}
                    None => doc.record_leaf(&name, &value),
                }
            }
            _ => {}
        }
    }

    if let Some(open) = path.last() {
        return Err(malformed(format_args!("unclosed element <{open}>")));
    }
    if !saw_element {
        return Err(malformed("no document element"));
    }
    Ok(doc)
}
