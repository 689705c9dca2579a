//! Request authentication: refresh cookie handling and the Bearer-token
//! extractor for the stateless verification path.

mod cookie;
mod extract;

pub use cookie::{
    build_refresh_cookie, build_state_cookie, clear_refresh_cookie, clear_state_cookie, get_cookie,
    OAUTH_STATE_COOKIE_NAME, REFRESH_COOKIE_NAME,
};
pub use extract::{Auth, AuthError, HasAuthState};
