//! Operator Console Commands
//!
//! Line-based commands read by the binary from stdin. Parsing is pure; the
//! binary maps each command onto a service call.

use rust_decimal::Decimal;

use crate::domain::trading::{OrderSize, OrderType, Side};

/// Usage text printed by `help` and after a parse error.
pub const HELP: &str = "\
commands:
  buy <coin> [<quote amount> | qty <quantity>] [market | limit [<price>]]
  sell <coin> [<quote amount> | qty <quantity>] [market | limit [<price>]]
  ordertype [market | limit | default]
                      show or override the order type for this session
  orders [<coin>]     open limit orders
  cancel <coin> <id>  cancel an open limit order
  fav <coin>          add a favorite
  unfav <coin>        remove a favorite
  dynamic [<coin>]    set or clear the dynamic coin
  price <coin>        cached price
  status              stream and watchlist status
  snapshot            record a portfolio snapshot
  trades [<days>]     trade summary (default 1 day)
  reload              re-read the preferences file
  quit";

/// A parsed console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Place an order.
    Order {
        /// Buy or sell.
        side: Side,
        /// Coin as typed; normalized by the watchlist quote asset.
        coin: String,
        /// Requested size.
        size: OrderSize,
        /// Market or limit; `None` follows the session's order type.
        order_type: Option<OrderType>,
        /// Explicit limit price.
        limit_price: Option<Decimal>,
    },
    /// Show the preferred, session and effective order types.
    ShowOrderType,
    /// Set (`Some`) or clear (`None`) the session order type.
    SetOrderType(Option<OrderType>),
    /// List open limit orders, for one coin or all.
    OpenOrders(Option<String>),
    /// Cancel an open limit order.
    Cancel {
        /// Coin as typed.
        coin: String,
        /// Exchange order id.
        order_id: String,
    },
    /// Add a favorite coin.
    Favorite(String),
    /// Remove a favorite coin.
    Unfavorite(String),
    /// Set or clear the dynamic coin.
    Dynamic(Option<String>),
    /// Show a cached price.
    Price(String),
    /// Show stream and watchlist status.
    Status,
    /// Record a portfolio snapshot.
    Snapshot,
    /// Summarize recent trades.
    Trades {
        /// Days back from today, inclusive.
        days: u32,
    },
    /// Re-read preferences.
    Reload,
    /// Print usage.
    Help,
    /// Exit.
    Quit,
}

/// Command parse error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// Blank line.
    #[error("empty command")]
    Empty,

    /// First word is not a command.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Required argument absent.
    #[error("{command} needs a {argument}")]
    MissingArgument {
        /// Command word.
        command: &'static str,
        /// What is missing.
        argument: &'static str,
    },

    /// Amount, quantity or day count that is not a positive number.
    #[error("not a positive number: {0}")]
    InvalidNumber(String),

    /// Order type other than market or limit.
    #[error("unknown order type: {0} (expected market, limit or default)")]
    InvalidOrderType(String),

    /// Trailing words.
    #[error("unexpected argument: {0}")]
    UnexpectedArgument(String),
}

impl ConsoleCommand {
    /// Parse one input line. Command words are case-insensitive.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let mut words = line.split_whitespace();
        let command = words.next().ok_or(CommandError::Empty)?.to_lowercase();

        let parsed = match command.as_str() {
            "buy" => Self::order(Side::Buy, "buy", &mut words)?,
            "sell" => Self::order(Side::Sell, "sell", &mut words)?,
            "ordertype" | "order-type" => match words.next() {
                None => Self::ShowOrderType,
                Some(raw) if raw.eq_ignore_ascii_case("default") => Self::SetOrderType(None),
                Some(raw) => Self::SetOrderType(Some(
                    OrderType::from_str_case_insensitive(raw)
                        .ok_or_else(|| CommandError::InvalidOrderType(raw.to_string()))?,
                )),
            },
            "orders" => Self::OpenOrders(words.next().map(str::to_string)),
            "cancel" => Self::Cancel {
                coin: required(&mut words, "cancel", "coin")?,
                order_id: required(&mut words, "cancel", "order id")?,
            },
            "fav" | "favorite" => Self::Favorite(required(&mut words, "fav", "coin")?),
            "unfav" | "unfavorite" => Self::Unfavorite(required(&mut words, "unfav", "coin")?),
            "dynamic" => Self::Dynamic(words.next().map(str::to_string)),
            "price" => Self::Price(required(&mut words, "price", "coin")?),
            "status" => Self::Status,
            "snapshot" => Self::Snapshot,
            "trades" => Self::Trades {
                days: match words.next() {
                    Some(raw) => raw
                        .parse()
                        .ok()
                        .filter(|days| *days > 0)
                        .ok_or_else(|| CommandError::InvalidNumber(raw.to_string()))?,
                    None => 1,
                },
            },
            "reload" => Self::Reload,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            _ => return Err(CommandError::UnknownCommand(command)),
        };

        match words.next() {
            Some(extra) => Err(CommandError::UnexpectedArgument(extra.to_string())),
            None => Ok(parsed),
        }
    }

    fn order<'a>(
        side: Side,
        command: &'static str,
        words: &mut impl Iterator<Item = &'a str>,
    ) -> Result<Self, CommandError> {
        let coin = required(words, command, "coin")?;
        let mut next = words.next();

        let size = match next {
            Some(word) if word.eq_ignore_ascii_case("qty") => {
                let raw = words.next().ok_or(CommandError::MissingArgument {
                    command,
                    argument: "quantity",
                })?;
                next = words.next();
                OrderSize::Quantity(positive(raw)?)
            }
            Some(raw) if OrderType::from_str_case_insensitive(raw).is_none() => {
                next = words.next();
                OrderSize::QuoteAmount(positive(raw)?)
            }
            _ => OrderSize::RiskDefault,
        };

        let (order_type, limit_price) = match next.map(OrderType::from_str_case_insensitive) {
            None => (None, None),
            Some(Some(OrderType::Market)) => (Some(OrderType::Market), None),
            Some(Some(OrderType::Limit)) => {
                (Some(OrderType::Limit), words.next().map(positive).transpose()?)
            }
            Some(None) => {
                return Err(CommandError::UnexpectedArgument(
                    next.unwrap_or_default().to_string(),
                ));
            }
        };

        Ok(Self::Order {
            side,
            coin,
            size,
            order_type,
            limit_price,
        })
    }
}

fn required<'a>(
    words: &mut impl Iterator<Item = &'a str>,
    command: &'static str,
    argument: &'static str,
) -> Result<String, CommandError> {
    words
        .next()
        .map(str::to_string)
        .ok_or(CommandError::MissingArgument { command, argument })
}

fn positive(raw: &str) -> Result<Decimal, CommandError> {
    raw.parse::<Decimal>()
        .ok()
        .filter(|value| *value > Decimal::ZERO)
        .ok_or_else(|| CommandError::InvalidNumber(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use test_case::test_case;

    use super::*;

    #[test_case("buy BTC", Side::Buy, OrderSize::RiskDefault ; "risk default")]
    #[test_case("BUY btc 50", Side::Buy, OrderSize::QuoteAmount(dec!(50)) ; "quote amount")]
    #[test_case("sell eth qty 0.25", Side::Sell, OrderSize::Quantity(dec!(0.25)) ; "quantity")]
    #[test_case("  sell   eth   QTY 1 ", Side::Sell, OrderSize::Quantity(dec!(1)) ; "extra whitespace")]
    fn parses_orders(line: &str, side: Side, size: OrderSize) {
        let ConsoleCommand::Order {
            side: parsed_side,
            size: parsed_size,
            coin,
            order_type: None,
            limit_price: None,
        } = ConsoleCommand::parse(line).unwrap()
        else {
            panic!("not an order");
        };

        assert_eq!(parsed_side, side);
        assert_eq!(parsed_size, size);
        assert!(coin.eq_ignore_ascii_case("btc") || coin.eq_ignore_ascii_case("eth"));
    }

    #[test_case("buy btc limit", OrderSize::RiskDefault, Some(OrderType::Limit), None ; "risk default limit")]
    #[test_case("buy btc 50 LIMIT 59000.5", OrderSize::QuoteAmount(dec!(50)), Some(OrderType::Limit), Some(dec!(59000.5)) ; "amount with limit price")]
    #[test_case("sell btc qty 0.1 limit", OrderSize::Quantity(dec!(0.1)), Some(OrderType::Limit), None ; "quantity derived limit")]
    #[test_case("sell btc 20 market", OrderSize::QuoteAmount(dec!(20)), Some(OrderType::Market), None ; "explicit market")]
    fn parses_order_types(line: &str, size: OrderSize, order_type: Option<OrderType>, limit_price: Option<Decimal>) {
        let ConsoleCommand::Order {
            size: parsed_size,
            order_type: parsed_type,
            limit_price: parsed_price,
            ..
        } = ConsoleCommand::parse(line).unwrap()
        else {
            panic!("not an order");
        };

        assert_eq!(parsed_size, size);
        assert_eq!(parsed_type, order_type);
        assert_eq!(parsed_price, limit_price);
    }

    #[test]
    fn huge_quantity_parses_and_is_left_to_the_risk_gate() {
        let ConsoleCommand::Order { size, .. } =
            ConsoleCommand::parse("buy btc qty 79228162514264337593543950335").unwrap()
        else {
            panic!("not an order");
        };
        assert_eq!(size, OrderSize::Quantity(Decimal::MAX));
    }

    #[test]
    fn parses_order_type_and_open_order_commands() {
        assert_eq!(ConsoleCommand::parse("ordertype"), Ok(ConsoleCommand::ShowOrderType));
        assert_eq!(
            ConsoleCommand::parse("order-type LIMIT"),
            Ok(ConsoleCommand::SetOrderType(Some(OrderType::Limit)))
        );
        assert_eq!(
            ConsoleCommand::parse("ordertype default"),
            Ok(ConsoleCommand::SetOrderType(None))
        );
        assert_eq!(ConsoleCommand::parse("orders"), Ok(ConsoleCommand::OpenOrders(None)));
        assert_eq!(
            ConsoleCommand::parse("orders eth"),
            Ok(ConsoleCommand::OpenOrders(Some("eth".to_string())))
        );
        assert_eq!(
            ConsoleCommand::parse("cancel btc PAPER-7"),
            Ok(ConsoleCommand::Cancel {
                coin: "btc".to_string(),
                order_id: "PAPER-7".to_string(),
            })
        );
    }

    #[test]
    fn parses_watchlist_commands() {
        assert_eq!(
            ConsoleCommand::parse("fav sol"),
            Ok(ConsoleCommand::Favorite("sol".to_string()))
        );
        assert_eq!(
            ConsoleCommand::parse("unfav SOL"),
            Ok(ConsoleCommand::Unfavorite("SOL".to_string()))
        );
        assert_eq!(
            ConsoleCommand::parse("dynamic PEPE"),
            Ok(ConsoleCommand::Dynamic(Some("PEPE".to_string())))
        );
        assert_eq!(
            ConsoleCommand::parse("dynamic"),
            Ok(ConsoleCommand::Dynamic(None))
        );
    }

    #[test]
    fn trades_defaults_to_one_day() {
        assert_eq!(
            ConsoleCommand::parse("trades"),
            Ok(ConsoleCommand::Trades { days: 1 })
        );
        assert_eq!(
            ConsoleCommand::parse("trades 7"),
            Ok(ConsoleCommand::Trades { days: 7 })
        );
    }

    #[test_case("", CommandError::Empty ; "blank")]
    #[test_case("launch", CommandError::UnknownCommand("launch".to_string()) ; "unknown")]
    #[test_case("buy", CommandError::MissingArgument { command: "buy", argument: "coin" } ; "missing coin")]
    #[test_case("sell BTC qty", CommandError::MissingArgument { command: "sell", argument: "quantity" } ; "missing quantity")]
    #[test_case("buy BTC -5", CommandError::InvalidNumber("-5".to_string()) ; "negative amount")]
    #[test_case("buy BTC lots", CommandError::InvalidNumber("lots".to_string()) ; "word amount")]
    #[test_case("trades 0", CommandError::InvalidNumber("0".to_string()) ; "zero days")]
    #[test_case("status now", CommandError::UnexpectedArgument("now".to_string()) ; "trailing word")]
    #[test_case("buy btc 50 stop", CommandError::UnexpectedArgument("stop".to_string()) ; "unknown order type word")]
    #[test_case("buy btc limit 0", CommandError::InvalidNumber("0".to_string()) ; "zero limit price")]
    #[test_case("buy btc market 100", CommandError::UnexpectedArgument("100".to_string()) ; "price on market order")]
    #[test_case("ordertype stop", CommandError::InvalidOrderType("stop".to_string()) ; "unknown session order type")]
    #[test_case("cancel btc", CommandError::MissingArgument { command: "cancel", argument: "order id" } ; "cancel without id")]
    fn rejects_bad_input(line: &str, expected: CommandError) {
        assert_eq!(ConsoleCommand::parse(line), Err(expected));
    }
}
