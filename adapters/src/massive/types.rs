use serde_json::Value;

/// One frame element from the feed socket.
///
/// The aggregate payload is kept as raw JSON: provider schemas vary across
/// versions, and downstream normalization probes key aliases instead of
/// binding to a fixed shape.
#[derive(Debug, Clone)]
pub enum FeedMessage {
    /// Per-second aggregate for a subscribed symbol.
    SecondAgg(Value),
    /// Connection / auth lifecycle message.
    Status { status: String, message: String },
    /// Forward-compatibility fallback for unrecognized events.
    Unknown(Value),
}

/// Feed tier. Selects the host to dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Feed {
    #[default]
    RealTime,
    Delayed,
}

impl Feed {
    /// Permissive parsing; unknown values fall back to realtime.
    pub fn parse(s: &str) -> Feed {
        match s.trim().to_lowercase().as_str() {
            "delayed" => Feed::Delayed,
            _ => Feed::RealTime,
        }
    }

    pub fn host(&self) -> &'static str {
        match self {
            Feed::RealTime => "wss://socket.massive.com",
            Feed::Delayed => "wss://delayed.massive.com",
        }
    }
}

/// Asset class. Selects the socket path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Market {
    #[default]
    Stocks,
    Crypto,
    Forex,
    Options,
}

impl Market {
    /// Permissive parsing; unknown values fall back to stocks.
    pub fn parse(s: &str) -> Market {
        match s.trim().to_lowercase().as_str() {
            "crypto" => Market::Crypto,
            "forex" => Market::Forex,
            "options" => Market::Options,
            _ => Market::Stocks,
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            Market::Stocks => "stocks",
            Market::Crypto => "crypto",
            Market::Forex => "forex",
            Market::Options => "options",
        }
    }
}

/// Subscription topic; becomes the per-symbol channel prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    SecondAggregates,
    MinuteAggregates,
}

impl Topic {
    pub fn prefix(&self) -> &'static str {
        match self {
            Topic::SecondAggregates => "A",
            Topic::MinuteAggregates => "AM",
        }
    }

    /// Build the `params` string for a subscribe frame: `"A.AGQ,A.MSFT"`.
    pub fn params(&self, symbols: &[String]) -> String {
        symbols
            .iter()
            .map(|s| format!("{}.{}", self.prefix(), s))
            .collect::<Vec<_>>()
            .join(",")
    }
}
