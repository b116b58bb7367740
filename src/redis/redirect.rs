/// Redis cluster redirection handling (MOVED and ASK)
///
/// Redirect replies are recognised with an Aho-Corasick scan of the error
/// text, so ordinary error replies cost a single pass.
use super::contents::Contents;
use super::resp::RespValue;
use crate::core::{AddressError, HostAndPort, DEFAULT_PORT};
use aho_corasick::AhoCorasick;
use lazy_static::lazy_static;

/// Types of Redis cluster redirections
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectType {
    /// MOVED redirection - slot has permanently moved
    Moved { slot: u16, address: String },
    /// ASK redirection - temporary redirection during slot migration
    Ask { slot: u16, address: String },
}

impl RedirectType {
    pub fn slot(&self) -> u16 {
        match self {
            RedirectType::Moved { slot, .. } | RedirectType::Ask { slot, .. } => *slot,
        }
    }

    /// Redirect target as a node address
    pub fn target(&self) -> Result<HostAndPort, RedirectError> {
        let address = match self {
            RedirectType::Moved { address, .. } | RedirectType::Ask { address, .. } => address,
        };
        Ok(HostAndPort::parse(address, DEFAULT_PORT)?)
    }

    pub fn requires_asking(&self) -> bool {
        matches!(self, RedirectType::Ask { .. })
    }
}

const BYTE_SPACE: u8 = b' ';
const PATTERNS: &[&str] = &["ASK", "MOVED"];

lazy_static! {
    static ref FINDER: AhoCorasick =
        AhoCorasick::new(PATTERNS).expect("Failed to create AhoCorasick pattern finder");
}

/// Redis cluster redirection parser
pub struct RedirectParser;

/// Parse error for redirection responses
#[derive(Debug, thiserror::Error)]
pub enum RedirectError {
    #[error("Not a redirection response")]
    NotRedirection,
    #[error("Invalid redirection target: {0}")]
    InvalidTarget(#[from] AddressError),
    #[error("Max redirects exceeded ({0})")]
    TooManyRedirects(u8),
}

impl RedirectParser {
    /// Parse error reply text such as `MOVED 3999 127.0.0.1:6381`
    pub fn parse_redirect_bytes(data: &[u8]) -> Option<RedirectType> {
        let mat = FINDER.find(data)?;
        // The keyword must open the error text
        if mat.start() != 0 {
            return None;
        }
        let end = mat.end();
        if end >= data.len() || data[end] != BYTE_SPACE {
            return None;
        }

        let rdata = &data[end + 1..];
        let pos = rdata.iter().position(|&x| x == BYTE_SPACE)?;
        let sdata = &rdata[..pos];
        let tdata = &rdata[pos + 1..];

        let slot = btoi::btoi::<u16>(sdata).ok()?;
        let to = String::from_utf8_lossy(tdata);
        let address = to.trim_end_matches('\n').trim_end_matches('\r').to_string();
        if address.is_empty() {
            return None;
        }

        if mat.pattern().as_u32() == 0 {
            Some(RedirectType::Ask { slot, address })
        } else {
            Some(RedirectType::Moved { slot, address })
        }
    }

    /// Parse a RESP error reply for redirection information
    pub fn parse_redirect(resp_value: &RespValue) -> Result<RedirectType, RedirectError> {
        match resp_value {
            RespValue::Error(text) => {
                Self::parse_redirect_bytes(text).ok_or(RedirectError::NotRedirection)
            }
            _ => Err(RedirectError::NotRedirection),
        }
    }

    pub fn is_redirect(resp_value: &RespValue) -> bool {
        Self::parse_redirect(resp_value).is_ok()
    }
}

/// Redirect bookkeeping for one command
#[derive(Debug, Clone)]
pub struct RedirectionContext {
    pub redirect_count: u8,
    pub max_redirects: u8,
    pub redirect_chain: Vec<HostAndPort>,
}

impl RedirectionContext {
    pub fn new(max_redirects: u8) -> Self {
        Self {
            redirect_count: 0,
            max_redirects,
            redirect_chain: Vec::new(),
        }
    }

    pub fn add_redirect(&mut self, target: &HostAndPort) -> Result<(), RedirectError> {
        if !self.can_redirect() {
            return Err(RedirectError::TooManyRedirects(self.max_redirects));
        }
        self.redirect_count += 1;
        self.redirect_chain.push(target.clone());
        Ok(())
    }

    pub fn can_redirect(&self) -> bool {
        self.redirect_count < self.max_redirects
    }
}

/// The ASKING command that must precede a command sent after ASK
pub fn asking_contents() -> Contents {
    let mut contents = Contents::new();
    contents.push("ASKING");
    contents
}
