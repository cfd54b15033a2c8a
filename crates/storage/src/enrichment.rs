//! User agent enrichment.
//!
//! Parses user agent strings into browser, OS and device columns at row
//! conversion time.

use woothee::parser::Parser;

/// Client details derived from a user agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub device_type: String,
    pub browser: String,
    pub browser_version: String,
    pub os: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            device_type: "unknown".into(),
            browser: "unknown".into(),
            browser_version: "unknown".into(),
            os: "unknown".into(),
        }
    }
}

/// Wraps a woothee parser (~7us per parse).
pub struct UserAgentEnricher {
    parser: Parser,
}

impl UserAgentEnricher {
    pub fn new() -> Self {
        Self {
            parser: Parser::new(),
        }
    }

    pub fn parse(&self, user_agent: Option<&str>) -> ClientInfo {
        let mut info = ClientInfo::default();
        let Some(ua) = user_agent.filter(|ua| !ua.is_empty()) else {
            return info;
        };
        let Some(result) = self.parser.parse(ua) else {
            return info;
        };

        if known(result.name) {
            info.browser = result.name.to_string();
        }
        if known(&result.version) {
            info.browser_version = result.version.to_string();
        }
        if known(result.os) {
            info.os = result.os.to_string();
        }

        // woothee categories: pc, smartphone, mobilephone, crawler, appliance, misc
        info.device_type = match result.category {
            "pc" => "desktop",
            "smartphone" | "mobilephone" => "mobile",
            "crawler" => "bot",
            "appliance" => "other",
            _ => "unknown",
        }
        .to_string();

        info
    }
}

fn known(value: &str) -> bool {
    !value.is_empty() && value != "UNKNOWN"
}

impl Default for UserAgentEnricher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chrome_macos() {
        let info = UserAgentEnricher::new().parse(Some(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        ));

        assert_eq!(info.browser, "Chrome");
        assert!(info.browser_version.starts_with("120"));
        assert_eq!(info.os, "Mac OSX");
        assert_eq!(info.device_type, "desktop");
    }

    #[test]
    fn test_iphone_is_mobile() {
        let info = UserAgentEnricher::new().parse(Some(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1",
        ));
        assert_eq!(info.device_type, "mobile");
    }

    #[test]
    fn test_bot_detected() {
        let info = UserAgentEnricher::new().parse(Some(
            "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)",
        ));
        assert_eq!(info.device_type, "bot");
    }

    #[test]
    fn test_missing_user_agent_is_unknown() {
        let enricher = UserAgentEnricher::new();
        assert_eq!(enricher.parse(None), ClientInfo::default());
        assert_eq!(enricher.parse(Some("")), ClientInfo::default());
    }
}
