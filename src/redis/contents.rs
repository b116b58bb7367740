//! Command argv construction
//!
//! Keys are namespaced as `{ns}` + separator + key. The braces make the
//! namespace the cluster hash tag, so every key of a namespace lands in the
//! same slot.

use bytes::Bytes;
use std::collections::BTreeMap;

/// Ordered command arguments with their lengths
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Contents {
    stack: Vec<Bytes>,
    sizes: Vec<usize>,
}

impl Contents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<B: Into<Bytes>>(&mut self, arg: B) {
        let arg = arg.into();
        self.sizes.push(arg.len());
        self.stack.push(arg);
    }

    pub fn argv(&self) -> &[Bytes] {
        &self.stack
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// The command name, if any
    pub fn command(&self) -> Option<&[u8]> {
        self.stack.first().map(|b| b.as_ref())
    }
}

impl<S: AsRef<str>> From<&[S]> for Contents {
    fn from(args: &[S]) -> Self {
        let mut contents = Contents::new();
        for arg in args {
            contents.push(Bytes::copy_from_slice(arg.as_ref().as_bytes()));
        }
        contents
    }
}

/// Builds namespaced command contents
#[derive(Debug, Clone)]
pub struct ContentsBuilder {
    separator: char,
}

impl ContentsBuilder {
    pub fn new(separator: char) -> Self {
        Self { separator }
    }

    fn namespaced(&self, ns: &str, key: &str) -> Bytes {
        Bytes::from(format!("{{{}}}{}{}", ns, self.separator, key))
    }

    /// Plain argv without namespacing
    pub fn build(&self, args: &[&str]) -> Contents {
        Contents::from(args)
    }

    /// `cmd {ns}key data...`
    pub fn build_with_key(&self, cmd: &str, ns: &str, key: &str, data: &[Bytes]) -> Contents {
        let mut contents = Contents::new();
        contents.push(Bytes::copy_from_slice(cmd.as_bytes()));
        contents.push(self.namespaced(ns, key));
        for item in data {
            contents.push(item.clone());
        }
        contents
    }

    /// `cmd {ns}k1 v1 {ns}k2 v2 ... extra...`
    pub fn build_with_data_map(
        &self,
        cmd: &str,
        ns: &str,
        data_map: &BTreeMap<String, Bytes>,
        extra: &[&str],
    ) -> Contents {
        let mut contents = Contents::new();
        contents.push(Bytes::copy_from_slice(cmd.as_bytes()));
        for (key, value) in data_map {
            contents.push(self.namespaced(ns, key));
            contents.push(value.clone());
        }
        for arg in extra {
            contents.push(Bytes::copy_from_slice(arg.as_bytes()));
        }
        contents
    }

    /// `cmd {ns}k1 {ns}k2 ... extra...`
    pub fn build_with_keys(&self, cmd: &str, ns: &str, keys: &[&str], extra: &[&str]) -> Contents {
        let mut contents = Contents::new();
        contents.push(Bytes::copy_from_slice(cmd.as_bytes()));
        for key in keys {
            contents.push(self.namespaced(ns, key));
        }
        for arg in extra {
            contents.push(Bytes::copy_from_slice(arg.as_bytes()));
        }
        contents
    }
}

impl Default for ContentsBuilder {
    fn default() -> Self {
        Self::new(crate::SEPARATOR)
    }
}
