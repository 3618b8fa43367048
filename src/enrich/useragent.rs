//! Keyword based user-agent classification.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserAgentInfo {
    pub browser_name: String,
    pub os_name: String,
    pub device_type: String,
}

const BOT_KEYWORDS: [&str; 6] = ["bot", "crawler", "spider", "slurp", "headless", "lighthouse"];

/// Classify a user-agent string. Unrecognized parts are left empty.
pub fn parse_user_agent(ua: &str) -> UserAgentInfo {
    let ua = ua.trim();
    if ua.is_empty() {
        return UserAgentInfo::default();
    }
    let ua_lower = ua.to_lowercase();
    let has = |needle: &str| ua_lower.contains(needle);

    let device_type = if BOT_KEYWORDS.iter().any(|k| has(k)) {
        "bot"
    } else if has("ipad") || has("tablet") || (has("android") && !has("mobile")) {
        "tablet"
    } else if has("mobile") || has("iphone") || has("android") {
        "mobile"
    } else {
        "desktop"
    };

    // Order matters: Edge and Opera carry "chrome", Chrome carries "safari".
    let browser_name = if has("edg/") || has("edge/") {
        "Edge"
    } else if has("opr/") || has("opera") {
        "Opera"
    } else if has("samsungbrowser") {
        "Samsung Internet"
    } else if has("firefox") || has("fxios") {
        "Firefox"
    } else if has("chrome") || has("crios") || has("chromium") {
        "Chrome"
    } else if has("safari") {
        "Safari"
    } else if has("msie") || has("trident/") {
        "Internet Explorer"
    } else {
        ""
    };

    // iOS and Android user agents also mention "mac os x" and "linux".
    let os_name = if has("windows") {
        "Windows"
    } else if has("android") {
        "Android"
    } else if has("iphone") || has("ipad") || has("ipod") {
        "iOS"
    } else if has("mac os") || has("macintosh") {
        "macOS"
    } else if has("cros ") || has("cros;") {
        "Chrome OS"
    } else if has("linux") {
        "Linux"
    } else {
        ""
    };

    UserAgentInfo {
        browser_name: browser_name.to_string(),
        os_name: os_name.to_string(),
        device_type: device_type.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desktop_chrome_on_windows() {
        let info = parse_user_agent(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        );
        assert_eq!(info.browser_name, "Chrome");
        assert_eq!(info.os_name, "Windows");
        assert_eq!(info.device_type, "desktop");
    }

    #[test]
    fn test_edge_is_not_chrome() {
        let info = parse_user_agent(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
        );
        assert_eq!(info.browser_name, "Edge");
    }

    #[test]
    fn test_safari_on_iphone() {
        let info = parse_user_agent(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1",
        );
        assert_eq!(info.browser_name, "Safari");
        assert_eq!(info.os_name, "iOS");
        assert_eq!(info.device_type, "mobile");
    }

    #[test]
    fn test_android_tablet_and_phone() {
        let tablet = parse_user_agent(
            "Mozilla/5.0 (Linux; Android 13; SM-X700) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        );
        assert_eq!(tablet.os_name, "Android");
        assert_eq!(tablet.device_type, "tablet");

        let phone = parse_user_agent(
            "Mozilla/5.0 (Linux; Android 13; Pixel 7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36",
        );
        assert_eq!(phone.device_type, "mobile");
    }

    #[test]
    fn test_firefox_on_linux() {
        let info =
            parse_user_agent("Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0");
        assert_eq!(info.browser_name, "Firefox");
        assert_eq!(info.os_name, "Linux");
    }

    #[test]
    fn test_chrome_os_is_matched_as_a_token() {
        let info = parse_user_agent(
            "Mozilla/5.0 (X11; CrOS x86_64 14541.0.0) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        );
        assert_eq!(info.os_name, "Chrome OS");

        // "microsoft" contains "cros"
        let info = parse_user_agent("Microsoft BITS/7.8");
        assert_eq!(info.os_name, "");
    }

    #[test]
    fn test_bots_and_unknowns() {
        let info = parse_user_agent(
            "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)",
        );
        assert_eq!(info.device_type, "bot");

        let info = parse_user_agent("curl/8.4.0");
        assert_eq!(info.browser_name, "");
        assert_eq!(info.os_name, "");

        assert_eq!(parse_user_agent(""), UserAgentInfo::default());
    }
}
