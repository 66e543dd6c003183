use super::fields::{labelled_value, leading_number, leading_word, market_pairs};
use super::{require_price, AlertParser};
use crate::error::ParseError;
use crate::events::{Alert, Direction};

const NAME: &str = "standard";

/// English alert format:
///
/// ```text
/// Bullish Bias
/// Detected Symbol: NQ
/// Price: 19656.00
/// Strategy: Test (ID 3)
/// Market: NDX 19455.68, SPX 4561.37
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardAlertParser;

impl StandardAlertParser {
    fn direction(text: &str) -> Option<Direction> {
        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered.split_whitespace().collect();
        words.windows(2).find_map(|pair| {
            if !pair[1].starts_with("bias") {
                return None;
            }
            match pair[0] {
                "bullish" => Some(Direction::Bullish),
                "bearish" => Some(Direction::Bearish),
                _ => None,
            }
        })
    }

    /// `"Name (ID 3)"` gives `"3"`; a bare name is used as is.
    fn strategy_id(text: &str) -> String {
        let Some(value) = labelled_value(text, "strategy") else {
            return "unknown".to_string();
        };

        if let Some(open) = value.find('(') {
            let inner = value[open + 1..].trim_start();
            if let Some(prefix) = inner.get(..2) {
                if prefix.eq_ignore_ascii_case("id") {
                    let id = leading_number(inner[2..].trim_start());
                    if !id.is_empty() && !id.contains('.') {
                        return id.to_string();
                    }
                }
            }
        }

        let name: String = value
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '.')
            .collect();
        if name.is_empty() {
            "unknown".to_string()
        } else {
            name
        }
    }
}

impl AlertParser for StandardAlertParser {
    fn name(&self) -> &'static str {
        NAME
    }

    fn can_parse(&self, text: &str) -> bool {
        Self::direction(text).is_some() && text.to_ascii_lowercase().contains("detected symbol")
    }

    fn parse(&self, text: &str) -> Result<Alert, ParseError> {
        let direction = Self::direction(text).ok_or_else(|| ParseError::MissingField {
            parser: NAME.to_string(),
            field: "bias".to_string(),
        })?;

        let symbol = labelled_value(text, "detected symbol")
            .map(leading_word)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ParseError::MissingField {
                parser: NAME.to_string(),
                field: "symbol".to_string(),
            })?;

        let price = require_price(NAME, labelled_value(text, "price"))?;

        let mut alert = Alert::new(symbol.to_uppercase(), Some(price), direction);
        alert.strategy_id = Self::strategy_id(text);
        if let Some(market) = labelled_value(text, "market") {
            alert.market_data = market_pairs(market).into_iter().collect();
        }
        alert.source = NAME.to_string();
        alert.raw_text = text.to_string();
        Ok(alert)
    }
}
