//! PSN OAuth and API endpoint constants

/// Authorization endpoint — exchanges the NPSSO cookie for a one-time code.
pub const AUTHORIZE_ENDPOINT: &str = "https://ca.account.sony.com/api/authz/v3/oauth/authorize";

/// Token endpoint — exchanges the one-time code for an access token.
pub const TOKEN_ENDPOINT: &str = "https://ca.account.sony.com/api/authz/v3/oauth/token";

/// Trophy API base URL.
pub const TROPHY_API_BASE: &str = "https://m.np.playstation.com/api/trophy/v1";

/// User/profile API base URL.
pub const PROFILE_API_BASE: &str = "https://m.np.playstation.com/api/userProfile/v1";

/// Public OAuth client id of the PlayStation mobile app.
pub const PSN_CLIENT_ID: &str = "09515159-7237-4370-9b40-3806e67c0891";

/// Redirect URI registered for the mobile app client.
pub const REDIRECT_URI: &str = "com.scee.psxandroid.scecompcall://redirect";
