//! Secret value directives.
//!
//! A raw specification value is one of:
//! - `random(hex,N)` / `random(base64,N)`: N random characters
//! - `rsa(BITS)`: a PEM encoded RSA private key
//! - `uuid`: a random v4 UUID
//! - a string containing `{{ name }}` tokens, interpolated from substitutions
//! - `ssm(/literal/path)` or `ssm(name)`: the value of another parameter
//! - anything else: a literal

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rsa::RsaPrivateKey;
use regex::Regex;
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::error::{DeployError, Result, SecretError};

static CALL: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^(random|rsa|ssm)\((.*)\)$").ok());
static RANDOM_ARGS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*([A-Za-z0-9_]+)\s*,\s*(\d+)\s*$").ok());
static COUNT: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^\s*(\d+)\s*$").ok());
static BRACED: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\{[^{}]+\}").ok());
static TOKEN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\{\{[^0-9A-Za-z_]*([0-9A-Za-z_]+)[^0-9A-Za-z_]*\}\}").ok());

/// Smallest RSA key size accepted.
pub const MIN_RSA_BITS: usize = 1024;

/// Largest RSA key size accepted.
pub const MAX_RSA_BITS: usize = 8192;

/// A parsed secret directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// `random(hex,N)`
    RandomHex(usize),
    /// `random(base64,N)`
    RandomBase64(usize),
    /// `rsa(BITS)`
    Rsa(usize),
    /// `uuid`
    Uuid,
    /// A template with `{{ name }}` tokens.
    Interpolation(String),
    /// `ssm(...)` cross reference.
    Reference(Reference),
    /// A literal value.
    Literal(String),
}

/// Target of an `ssm(...)` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// An absolute parameter path.
    Path(String),
    /// A substitution whose value is the parameter path.
    Substitution(String),
}

impl Directive {
    /// Parses a raw, already trimmed specification value.
    ///
    /// # Errors
    ///
    /// Returns an error for directives with a recognised shape but invalid
    /// arguments, e.g. `random(hex,0)` or `rsa(12)`.
    pub fn parse(raw: &str) -> Result<Self> {
        let call = call_args(raw)?;

        if let Some(("random", args)) = call {
            let captures = pattern(&RANDOM_ARGS)?
                .captures(args)
                .ok_or_else(|| malformed(raw, "expected random(hex|base64,N)"))?;
            let length = parse_count(raw, &captures[2])?;
            return match &captures[1] {
                "hex" => Ok(Self::RandomHex(length)),
                "base64" => Ok(Self::RandomBase64(length)),
                other => Err(malformed(raw, &format!("unknown encoding '{other}'"))),
            };
        }

        if let Some(("rsa", args)) = call {
            let captures = pattern(&COUNT)?
                .captures(args)
                .ok_or_else(|| malformed(raw, "expected rsa(BITS)"))?;
            let bits = parse_count(raw, &captures[1])?;
            if !(MIN_RSA_BITS..=MAX_RSA_BITS).contains(&bits) {
                return Err(malformed(
                    raw,
                    &format!("key size must be between {MIN_RSA_BITS} and {MAX_RSA_BITS}"),
                ));
            }
            return Ok(Self::Rsa(bits));
        }

        if raw == "uuid" {
            return Ok(Self::Uuid);
        }

        if pattern(&BRACED)?.is_match(raw) {
            return Ok(Self::Interpolation(raw.to_string()));
        }

        if let Some(("ssm", args)) = call {
            let target = args.trim();
            if target.is_empty() {
                return Err(malformed(raw, "missing parameter path or substitution name"));
            }
            return Ok(Self::Reference(if target.starts_with('/') {
                Reference::Path(target.to_string())
            } else {
                Reference::Substitution(target.to_string())
            }));
        }

        Ok(Self::Literal(raw.to_string()))
    }

    /// Returns true for directives that produce fresh random values.
    #[must_use]
    pub const fn is_generator(&self) -> bool {
        matches!(
            self,
            Self::RandomHex(_) | Self::RandomBase64(_) | Self::Rsa(_) | Self::Uuid
        )
    }

    /// Produces a value for generator directives.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation fails or the directive is not a
    /// generator.
    pub fn generate(&self) -> Result<String> {
        let mut rng = rand::thread_rng();
        match self {
            Self::RandomHex(length) => {
                let mut bytes = vec![0_u8; length.div_ceil(2)];
                rng.fill_bytes(&mut bytes);
                let mut text = hex::encode(bytes);
                text.truncate(*length);
                Ok(text)
            }
            Self::RandomBase64(length) => {
                let mut bytes = vec![0_u8; *length];
                rng.fill_bytes(&mut bytes);
                let mut text = URL_SAFE_NO_PAD.encode(bytes);
                text.truncate(*length);
                Ok(text)
            }
            Self::Rsa(bits) => {
                let key = RsaPrivateKey::new(&mut rng, *bits).map_err(|e| SecretError::MalformedDirective {
                    directive: format!("rsa({bits})"),
                    reason: e.to_string(),
                })?;
                let pem = key.to_pkcs1_pem(LineEnding::LF).map_err(|e| SecretError::MalformedDirective {
                    directive: format!("rsa({bits})"),
                    reason: e.to_string(),
                })?;
                Ok(pem.as_str().to_string())
            }
            Self::Uuid => Ok(uuid::Uuid::new_v4().to_string()),
            Self::Interpolation(_) | Self::Reference(_) | Self::Literal(_) => {
                Err(DeployError::internal("directive is not a generator"))
            }
        }
    }
}

/// Replaces every `{{ name }}` token with its substitution.
///
/// # Errors
///
/// Returns an error naming the first token without a substitution.
pub fn interpolate(template: &str, substitutions: &BTreeMap<String, String>) -> Result<String> {
    let mut output = String::with_capacity(template.len());
    let mut last = 0;

    for captures in pattern(&TOKEN)?.captures_iter(template) {
        let (Some(token), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let value = substitutions
            .get(name.as_str())
            .ok_or_else(|| SecretError::UnresolvedSubstitution {
                name: name.as_str().to_string(),
            })?;
        output.push_str(&template[last..token.start()]);
        output.push_str(value);
        last = token.end();
    }

    output.push_str(&template[last..]);
    Ok(output)
}

/// Splits `name(args)` for the call-shaped directives.
fn call_args(raw: &str) -> Result<Option<(&str, &str)>> {
    Ok(pattern(&CALL)?.captures(raw).and_then(|captures| {
        let (Some(name), Some(args)) = (captures.get(1), captures.get(2)) else {
            return None;
        };
        Some((name.as_str(), args.as_str()))
    }))
}

fn pattern(regex: &LazyLock<Option<Regex>>) -> Result<&Regex> {
    regex
        .as_ref()
        .ok_or_else(|| DeployError::internal("invalid directive pattern"))
}

fn parse_count(raw: &str, text: &str) -> Result<usize> {
    match text.parse::<usize>() {
        Ok(0) | Err(_) => Err(malformed(raw, "expected a positive count")),
        Ok(n) => Ok(n),
    }
}

fn malformed(raw: &str, reason: &str) -> DeployError {
    SecretError::MalformedDirective {
        directive: raw.to_string(),
        reason: reason.to_string(),
    }
    .into()
}
