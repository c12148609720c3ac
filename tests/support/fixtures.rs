//! Test fixtures and constants.

/// Password that satisfies the default policy.
pub const PASSWORD: &str = "Tr0ub4dor&3";

/// Second policy-compliant password for rotation tests.
pub const NEW_PASSWORD: &str = "N3w-Passw0rd!";

/// Policy-compliant password that is never the right one.
pub const WRONG_PASSWORD: &str = "Wr0ng-Passw0rd!";

/// Standard secrets used across multiple tests.
pub const STANDARD_SECRETS: &[(&str, &str)] = &[
    ("DATABASE_URL", "postgres://localhost/mydb"),
    ("API_KEY", "sk-test-12345"),
    ("JWT_SECRET", "super-secret-jwt-token"),
    ("REDIS_URL", "redis://localhost:6379"),
    ("S3_BUCKET", "my-app-bucket"),
];

/// Values with characters that tend to break encoders.
pub const AWKWARD_VALUES: &[&str] = &[
    "",
    " leading and trailing ",
    "line1\nline2",
    "quotes \" and ' and `",
    "unicode: ключ 秘密 🔑",
    "{\"looks\":\"like json\"}",
];
