use std::fmt;
use std::str::FromStr;

use core_types::Score;
use serde::{Deserialize, Serialize};

/// Closed set of normalized signal kinds an evidence item may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    CorrelationPattern,
    ProcessActivity,
    FileActivity,
    NetworkIntent,
    FlowSignal,
    DnsQuery,
    DeceptionTrigger,
    ModelSignal,
}

impl SignalType {
    pub const ALL: [SignalType; 8] = [
        SignalType::CorrelationPattern,
        SignalType::ProcessActivity,
        SignalType::FileActivity,
        SignalType::NetworkIntent,
        SignalType::FlowSignal,
        SignalType::DnsQuery,
        SignalType::DeceptionTrigger,
        SignalType::ModelSignal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::CorrelationPattern => "CORRELATION_PATTERN",
            SignalType::ProcessActivity => "PROCESS_ACTIVITY",
            SignalType::FileActivity => "FILE_ACTIVITY",
            SignalType::NetworkIntent => "NETWORK_INTENT",
            SignalType::FlowSignal => "FLOW_SIGNAL",
            SignalType::DnsQuery => "DNS_QUERY",
            SignalType::DeceptionTrigger => "DECEPTION_TRIGGER",
            SignalType::ModelSignal => "MODEL_SIGNAL",
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSignal(pub String);

impl FromStr for SignalType {
    type Err = UnknownSignal;

    /// Case-insensitive; `-` and `_` are interchangeable. Collector aliases
    /// (`DPI_FLOW`, `DECEPTION`, `AI_SIGNAL`) map onto their canonical kind.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_uppercase().replace('-', "_");
        let kind = match norm.as_str() {
            "CORRELATION_PATTERN" | "CORRELATION" => SignalType::CorrelationPattern,
            "PROCESS_ACTIVITY" => SignalType::ProcessActivity,
            "FILE_ACTIVITY" => SignalType::FileActivity,
            "NETWORK_INTENT" => SignalType::NetworkIntent,
            "FLOW_SIGNAL" | "DPI_FLOW" => SignalType::FlowSignal,
            "DNS_QUERY" => SignalType::DnsQuery,
            "DECEPTION_TRIGGER" | "DECEPTION" => SignalType::DeceptionTrigger,
            "MODEL_SIGNAL" | "AI_SIGNAL" => SignalType::ModelSignal,
            _ => return Err(UnknownSignal(s.to_string())),
        };
        Ok(kind)
    }
}

/// Fixed weight table, in whole points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalWeights {
    pub correlation_pattern: u32,
    pub process_activity: u32,
    pub file_activity: u32,
    pub network_intent: u32,
    pub flow_signal: u32,
    pub dns_query: u32,
    pub deception_trigger: u32,
    pub model_signal: u32,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            correlation_pattern: 10,
            process_activity: 15,
            file_activity: 15,
            network_intent: 12,
            flow_signal: 20,
            dns_query: 8,
            deception_trigger: 25,
            model_signal: 18,
        }
    }
}

impl SignalWeights {
    pub fn weight(&self, signal: SignalType) -> Score {
        let points = match signal {
            SignalType::CorrelationPattern => self.correlation_pattern,
            SignalType::ProcessActivity => self.process_activity,
            SignalType::FileActivity => self.file_activity,
            SignalType::NetworkIntent => self.network_intent,
            SignalType::FlowSignal => self.flow_signal,
            SignalType::DnsQuery => self.dns_query,
            SignalType::DeceptionTrigger => self.deception_trigger,
            SignalType::ModelSignal => self.model_signal,
        };
        Score::from_points(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_and_aliases() {
        assert_eq!("dns_query".parse(), Ok(SignalType::DnsQuery));
        assert_eq!("Flow-Signal".parse(), Ok(SignalType::FlowSignal));
        assert_eq!("DPI_FLOW".parse(), Ok(SignalType::FlowSignal));
        assert_eq!("deception".parse(), Ok(SignalType::DeceptionTrigger));
        assert_eq!("AI_SIGNAL".parse(), Ok(SignalType::ModelSignal));
        assert!("PACKET_CAPTURE".parse::<SignalType>().is_err());
    }

    #[test]
    fn display_round_trips_through_parse() {
        for kind in SignalType::ALL {
            assert_eq!(kind.to_string().parse(), Ok(kind));
        }
    }

    #[test]
    fn default_weights() {
        let w = SignalWeights::default();
        assert_eq!(w.weight(SignalType::CorrelationPattern), Score::from_points(10));
        assert_eq!(w.weight(SignalType::DeceptionTrigger), Score::from_points(25));
        assert_eq!(w.weight(SignalType::DnsQuery), Score::from_points(8));
    }

    #[test]
    fn serde_uses_screaming_case() {
        let json = serde_json::to_string(&SignalType::NetworkIntent).unwrap();
        assert_eq!(json, "\"NETWORK_INTENT\"");
    }
}
