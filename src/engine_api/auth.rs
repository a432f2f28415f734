use crate::metrics;
use jsonwebtoken::{
    decode, encode, get_current_timestamp, Algorithm, DecodingKey, EncodingKey, Header,
    TokenData, Validation,
};
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use slog::{debug, error, Logger};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Default algorithm used for JWT token signing.
const DEFAULT_ALGORITHM: Algorithm = Algorithm::HS256;

/// JWT secret length in bytes.
pub const JWT_SECRET_LENGTH: usize = 32;

/// Execution clients reject tokens whose `iat` is more than 60s away from their clock, so a
/// published token older than this is re-signed before use.
pub const STALE_TOKEN_AGE_SECS: u64 = 50;

const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub enum Error {
    JWT(jsonwebtoken::errors::Error),
    InvalidKey(String),
    Io(std::io::Error),
    InvalidToken,
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        Error::JWT(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

/// Provides wrapper around `[u8; JWT_SECRET_LENGTH]` that implements `Zeroize`.
#[derive(Zeroize, ZeroizeOnDrop, Clone, PartialEq, Eq)]
pub struct JwtKey([u8; JWT_SECRET_LENGTH]);

impl JwtKey {
    /// Wrap given slice in `Self`. Returns an error if slice.len() != `JWT_SECRET_LENGTH`.
    pub fn from_slice(key: &[u8]) -> Result<Self, Error> {
        if key.len() != JWT_SECRET_LENGTH {
            return Err(Error::InvalidKey(format!(
                "expected {} bytes, got {}",
                JWT_SECRET_LENGTH,
                key.len()
            )));
        }
        let mut res = [0; JWT_SECRET_LENGTH];
        res.copy_from_slice(key);
        Ok(Self(res))
    }

    /// Decode a hex secret, tolerating surrounding whitespace and a `0x` prefix.
    pub fn from_hex(hex_str: &str) -> Result<Self, Error> {
        let trimmed = hex_str.trim();
        let stripped = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let mut bytes = hex::decode(stripped)
            .map_err(|e| Error::InvalidKey(format!("secret is not valid hex: {:?}", e)))?;
        let key = Self::from_slice(&bytes);
        bytes.zeroize();
        key
    }

    /// Load the hex-encoded secret stored at `path`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let mut contents = std::fs::read_to_string(path)?;
        let key = Self::from_hex(&contents);
        contents.zeroize();
        key
    }

    /// Generate a random secret.
    pub fn random() -> Self {
        Self(rand::thread_rng().gen::<[u8; JWT_SECRET_LENGTH]>())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn hex_string(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for JwtKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JwtKey(0x{}..)", hex::encode(&self.0[..2]))
    }
}

/// A signed token together with the `iat` it was minted with.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken {
    token: String,
    issued_at: u64,
}

impl BearerToken {
    pub fn as_str(&self) -> &str {
        &self.token
    }

    pub fn issued_at(&self) -> u64 {
        self.issued_at
    }

    pub fn age_secs(&self, now: u64) -> u64 {
        now.saturating_sub(self.issued_at)
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerToken")
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Contains the JWT secret and claims parameters.
pub struct Auth {
    key: EncodingKey,
    id: Option<String>,
    clv: Option<String>,
}

impl Auth {
    pub fn new(secret: JwtKey, id: Option<String>, clv: Option<String>) -> Self {
        Self {
            key: EncodingKey::from_secret(secret.as_bytes()),
            id,
            clv,
        }
    }

    /// Create a new `Auth` struct given the path to the file containing the hex
    /// encoded jwt key.
    pub fn new_with_path<P: AsRef<Path>>(
        jwt_path: P,
        id: Option<String>,
        clv: Option<String>,
    ) -> Result<Self, Error> {
        Ok(Self::new(JwtKey::from_file(jwt_path)?, id, clv))
    }

    /// Generate a JWT token with `iat` set to current time.
    pub fn generate_token(&self) -> Result<BearerToken, Error> {
        let claims = self.generate_claims_at_timestamp();
        let issued_at = claims.iat;
        let token = encode(&Header::new(DEFAULT_ALGORITHM), &claims, &self.key)?;
        Ok(BearerToken { token, issued_at })
    }

    fn generate_claims_at_timestamp(&self) -> Claims {
        Claims {
            iat: get_current_timestamp(),
            id: self.id.clone(),
            clv: self.clv.clone(),
        }
    }

    /// Validate a JWT token given the secret key and return the originally signed `TokenData`.
    pub fn validate_token(token: &str, secret: &JwtKey) -> Result<TokenData<Claims>, Error> {
        let mut validation = Validation::new(DEFAULT_ALGORITHM);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["iat"]);

        decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .map_err(Into::into)
    }
}

/// Claims struct as defined in
/// https://github.com/ethereum/execution-apis/blob/main/src/engine/authentication.md#jwt-claims
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// issued-at claim. Represented as seconds passed since UNIX_EPOCH.
    pub iat: u64,
    /// Optional unique identifier for the CL node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Optional client version for the CL node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clv: Option<String>,
}

/// Mints the tokens published by a `JwtTokenManager`.
pub trait TokenSigner: Send + Sync {
    fn sign(&self) -> Result<BearerToken, Error>;
}

impl TokenSigner for Auth {
    fn sign(&self) -> Result<BearerToken, Error> {
        self.generate_token()
    }
}

/// Publishes the bearer token used for every Engine API request.
///
/// Each refresh signs a fresh token and swaps the published `Arc`, so a reader holding an older
/// token keeps a consistent value while new readers see the replacement.
pub struct JwtTokenManager {
    signer: Box<dyn TokenSigner>,
    current: RwLock<Option<Arc<BearerToken>>>,
    log: Logger,
}

impl JwtTokenManager {
    pub fn new(auth: Auth, log: Logger) -> Self {
        Self::with_signer(auth, log)
    }

    pub fn with_signer<S: TokenSigner + 'static>(signer: S, log: Logger) -> Self {
        Self {
            signer: Box::new(signer),
            current: RwLock::new(None),
            log,
        }
    }

    /// The most recently published token. Never blocks on signing.
    pub fn current_token(&self) -> Option<Arc<BearerToken>> {
        self.current.read().clone()
    }

    /// Sign and publish a new token. On failure the previous token stays published.
    pub fn refresh(&self) -> Result<Arc<BearerToken>, Error> {
        match self.signer.sign() {
            Ok(token) => {
                let token = Arc::new(token);
                *self.current.write() = Some(token.clone());
                metrics::inc_counter_vec(&metrics::ENGINE_JWT_REFRESH, &["success"]);
                Ok(token)
            }
            Err(e) => {
                metrics::inc_counter_vec(&metrics::ENGINE_JWT_REFRESH, &["error"]);
                Err(e)
            }
        }
    }

    /// Returns the published token, signing one first if nothing has been published yet or the
    /// published one is too old to be accepted.
    pub fn token_for_request(&self) -> Result<Arc<BearerToken>, Error> {
        match self.current_token() {
            Some(token) if token.age_secs(get_current_timestamp()) < STALE_TOKEN_AGE_SECS => {
                Ok(token)
            }
            _ => self.refresh(),
        }
    }

    /// Spawn the refresh loop. A token is published immediately and then once per `interval`
    /// until `shutdown` is cancelled.
    pub fn start(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move { manager.refresh_loop(interval, shutdown).await })
    }

    async fn refresh_loop(&self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval.max(MIN_REFRESH_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!(self.log, "Stopping engine API token refresh");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh() {
                        error!(
                            self.log,
                            "Failed to sign engine API token";
                            "error" => ?e,
                            "info" => "the previous token remains in use"
                        );
                    }
                }
            }
        }
    }
}
