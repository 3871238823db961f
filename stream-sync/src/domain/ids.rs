use std::fmt;

/// Unique identifier for a venue
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VenueId(String);

impl VenueId {
    pub fn new(id: impl Into<String>) -> Self {
        VenueId(id.into().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VenueId {
    fn from(s: &str) -> Self {
        VenueId::new(s)
    }
}

impl From<String> for VenueId {
    fn from(s: String) -> Self {
        VenueId::new(s)
    }
}

/// One physical streaming connection: a venue plus the market segment or
/// account stream it carries (e.g. `binance/spot`, `binance/user`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    pub venue: VenueId,
    pub stream: String,
}

impl ConnectionId {
    pub fn new(venue: impl Into<VenueId>, stream: impl Into<String>) -> Self {
        ConnectionId {
            venue: venue.into(),
            stream: stream.into().to_lowercase(),
        }
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.venue, self.stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_venue_id() {
        let id = VenueId::new("Binance");
        assert_eq!(id.as_str(), "binance");
    }

    #[test]
    fn test_connection_id() {
        let conn = ConnectionId::new("binance", "Spot");
        assert_eq!(conn.venue, VenueId::new("binance"));
        assert_eq!(conn.to_string(), "binance/spot");
    }
}
