mod smartcar;
mod traits;

pub use smartcar::{SmartcarProvider, SMARTCAR_TOKEN_URL};
pub use traits::{OAuthProvider, TokenSet};
