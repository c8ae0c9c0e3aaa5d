use rand::seq::SliceRandom;
use rand::Rng;

/// Chrome builds we impersonate. Major version must agree between the UA
/// string and the sec-ch-ua client hints or Akamai flags the session.
static CHROME_BUILDS: &[(&str, &str)] = &[
    ("129", "129.0.6668.100"),
    ("130", "130.0.6723.92"),
    ("131", "131.0.6778.108"),
    ("132", "132.0.6834.84"),
];

static PLATFORMS: &[(&str, &str)] = &[
    ("Windows NT 10.0; Win64; x64", "Windows"),
    ("Macintosh; Intel Mac OS X 10_15_7", "macOS"),
];

static TIMEZONES: &[&str] = &[
    "America/New_York",
    "America/Chicago",
    "America/Denver",
    "America/Los_Angeles",
];

/// Randomized but internally consistent browser identity. One fingerprint is
/// bound to one browser for the browser's whole lifetime.
#[derive(Debug, Clone)]
pub struct StealthFingerprint {
    pub user_agent: String,
    pub headers: Vec<(String, String)>,
    pub viewport: (u32, u32),
    pub locale: String,
    pub timezone_id: String,
}

pub fn generate_fingerprint() -> StealthFingerprint {
    let mut rng = rand::thread_rng();

    let (major, full) = CHROME_BUILDS
        .choose(&mut rng)
        .copied()
        .unwrap_or(("131", "131.0.6778.108"));
    let (ua_platform, ch_platform) = PLATFORMS
        .choose(&mut rng)
        .copied()
        .unwrap_or(PLATFORMS[0]);

    let user_agent = format!(
        "Mozilla/5.0 ({ua_platform}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{full} Safari/537.36"
    );

    let headers = vec![
        (
            "sec-ch-ua".to_string(),
            format!(
                "\"Chromium\";v=\"{major}\", \"Google Chrome\";v=\"{major}\", \"Not_A Brand\";v=\"24\""
            ),
        ),
        ("sec-ch-ua-mobile".to_string(), "?0".to_string()),
        (
            "sec-ch-ua-platform".to_string(),
            format!("\"{ch_platform}\""),
        ),
        (
            "Accept-Language".to_string(),
            "en-US,en;q=0.9".to_string(),
        ),
    ];

    // Narrow band just off the 1920x1080 headless default.
    let viewport = (rng.gen_range(1900..1921), rng.gen_range(1060..1081));

    let timezone_id = TIMEZONES
        .choose(&mut rng)
        .copied()
        .unwrap_or("America/New_York")
        .to_string();

    StealthFingerprint {
        user_agent,
        headers,
        viewport,
        locale: "en-US".to_string(),
        timezone_id,
    }
}
