use super::fields::{labelled_value, leading_word};
use super::{require_price, AlertParser};
use crate::error::ParseError;
use crate::events::{Alert, Direction};

const NAME: &str = "chinese";

const BULLISH: &str = "看多";
const BEARISH: &str = "看空";
const SYMBOL: &str = "标的";
const PRICE: &str = "价格";
const STRATEGY: &str = "策略";

/// Chinese alert format:
///
/// ```text
/// 看多
/// 标的：AAPL
/// 价格：150.50
/// 策略：趋势跟踪
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct ChineseAlertParser;

impl ChineseAlertParser {
    /// The earliest direction marker wins.
    fn direction(text: &str) -> Option<Direction> {
        match (text.find(BULLISH), text.find(BEARISH)) {
            (Some(b), Some(s)) if s < b => Some(Direction::Bearish),
            (Some(_), _) => Some(Direction::Bullish),
            (None, Some(_)) => Some(Direction::Bearish),
            (None, None) => None,
        }
    }
}

impl AlertParser for ChineseAlertParser {
    fn name(&self) -> &'static str {
        NAME
    }

    fn can_parse(&self, text: &str) -> bool {
        Self::direction(text).is_some() && text.contains(SYMBOL)
    }

    fn parse(&self, text: &str) -> Result<Alert, ParseError> {
        let direction = Self::direction(text).ok_or_else(|| ParseError::MissingField {
            parser: NAME.to_string(),
            field: "direction".to_string(),
        })?;

        let symbol = labelled_value(text, SYMBOL)
            .map(leading_word)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ParseError::MissingField {
                parser: NAME.to_string(),
                field: "symbol".to_string(),
            })?;

        let price = require_price(NAME, labelled_value(text, PRICE))?;

        let mut alert = Alert::new(symbol.to_uppercase(), Some(price), direction);
        alert.strategy_id = labelled_value(text, STRATEGY)
            .filter(|s| !s.is_empty())
            .unwrap_or("unknown")
            .to_string();
        alert.source = NAME.to_string();
        alert.raw_text = text.to_string();
        Ok(alert)
    }
}
