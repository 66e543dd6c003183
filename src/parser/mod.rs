//! Alert parsers and the registry that picks one per message.

pub mod chinese;
pub mod fields;
pub mod standard;

use tracing::{debug, info, warn};

use crate::constants::log_events;
use crate::error::ParseError;
use crate::events::Alert;

pub use chinese::ChineseAlertParser;
pub use standard::StandardAlertParser;

/// One alert text format. Implementations hold no state.
pub trait AlertParser: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_parse(&self, text: &str) -> bool;

    fn parse(&self, text: &str) -> Result<Alert, ParseError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    English,
    Chinese,
}

/// More than five CJK characters counts as Chinese.
pub fn detect_language(text: &str) -> Language {
    if fields::cjk_count(text) > 5 {
        Language::Chinese
    } else {
        Language::English
    }
}

/// Parse the price value of a labelled field. Missing, malformed and
/// non-positive prices are all errors.
pub(crate) fn require_price(parser: &str, value: Option<&str>) -> Result<f64, ParseError> {
    let value = value.ok_or_else(|| ParseError::MissingField {
        parser: parser.to_string(),
        field: "price".to_string(),
    })?;

    let number = fields::leading_number(value);
    let price = number.parse::<f64>().map_err(|_| ParseError::InvalidNumber {
        parser: parser.to_string(),
        field: "price".to_string(),
        value: value.to_string(),
    })?;

    if !price.is_finite() || price <= 0.0 {
        return Err(ParseError::InvalidValue {
            parser: parser.to_string(),
            reason: format!("price must be positive, got {}", value),
        });
    }
    Ok(price)
}

/// Ordered list of parsers; the first one that claims a text parses it.
pub struct ParserRegistry {
    parsers: Vec<Box<dyn AlertParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self { parsers: Vec::new() }
    }

    /// Standard format always; Chinese when `formats` lists it.
    pub fn from_formats(formats: &[String]) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(StandardAlertParser));
        if formats.iter().any(|f| f.eq_ignore_ascii_case("chinese")) {
            registry.register(Box::new(ChineseAlertParser));
        }
        info!("🧩 [PARSER] Registered parsers: {:?}", registry.parser_names());
        registry
    }

    pub fn register(&mut self, parser: Box<dyn AlertParser>) {
        self.parsers.push(parser);
    }

    pub fn parser_names(&self) -> Vec<&'static str> {
        self.parsers.iter().map(|p| p.name()).collect()
    }

    /// `Ok(None)` means no parser recognised the text.
    pub fn parse(&self, text: &str) -> Result<Option<Alert>, ParseError> {
        let Some(parser) = self.parsers.iter().find(|p| p.can_parse(text)) else {
            debug!(
                "[PARSER] No parser matched ({:?} text, {} chars)",
                detect_language(text),
                text.chars().count()
            );
            return Ok(None);
        };

        match parser.parse(text) {
            Ok(alert) => {
                info!(
                    event = log_events::ALERT_PARSED,
                    "🧾 [PARSER] {} parsed {} {} @ {:?}",
                    parser.name(),
                    alert.direction,
                    alert.symbol,
                    alert.reference_price
                );
                Ok(Some(alert))
            }
            Err(e) => {
                warn!("⚠️ [PARSER] {}", e);
                Err(e)
            }
        }
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::from_formats(&[])
    }
}
