//! In-process KMS double for tests and local runs.

use crate::kms::{EncryptionContext, KmsClient, KmsError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

type Predicate = Box<dyn Fn(&[u8]) -> bool + Send + Sync>;

struct Rule {
    matches: Predicate,
    response: Result<Vec<u8>, KmsError>,
}

#[derive(Default)]
struct Responses {
    default: Option<Result<Vec<u8>, KmsError>>,
    rules: Vec<Rule>,
}

impl Responses {
    fn respond(&self, input: &[u8]) -> Result<Vec<u8>, KmsError> {
        if let Some(rule) = self.rules.iter().find(|r| (r.matches)(input)) {
            return rule.response.clone();
        }
        match &self.default {
            Some(response) => response.clone(),
            // Pass-through when nothing was configured
            None => Ok(input.to_vec()),
        }
    }
}

/// In-process key-management double.
///
/// Without configuration it echoes its input. Rules are checked in
/// insertion order before the default response.
#[derive(Default)]
pub struct MockKms {
    encrypt: Mutex<Responses>,
    decrypt: Mutex<Responses>,
    encrypt_calls: AtomicUsize,
    decrypt_calls: AtomicUsize,
}

impl MockKms {
    /// Create a pass-through mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default encrypt response. `err` wins over `output`.
    pub fn set_encrypt_resp(&self, output: impl Into<Vec<u8>>, err: Option<KmsError>) {
        self.encrypt.lock().default = Some(err.map_or_else(|| Ok(output.into()), Err));
    }

    /// Set the default decrypt response. `err` wins over `output`.
    pub fn set_decrypt_resp(&self, output: impl Into<Vec<u8>>, err: Option<KmsError>) {
        self.decrypt.lock().default = Some(err.map_or_else(|| Ok(output.into()), Err));
    }

    /// Respond with `output` or `err` to plaintexts matching `matches`.
    pub fn add_encrypt_rule<F>(
        &self,
        matches: F,
        output: impl Into<Vec<u8>>,
        err: Option<KmsError>,
    )
    where
        F: Fn(&[u8]) -> bool + Send + Sync + 'static,
    {
        self.encrypt.lock().rules.push(Rule {
            matches: Box::new(matches),
            response: err.map_or_else(|| Ok(output.into()), Err),
        });
    }

    /// Respond with `output` or `err` to ciphertexts matching `matches`.
    pub fn add_decrypt_rule<F>(
        &self,
        matches: F,
        output: impl Into<Vec<u8>>,
        err: Option<KmsError>,
    )
    where
        F: Fn(&[u8]) -> bool + Send + Sync + 'static,
    {
        self.decrypt.lock().rules.push(Rule {
            matches: Box::new(matches),
            response: err.map_or_else(|| Ok(output.into()), Err),
        });
    }

    /// Number of encrypt calls received.
    pub fn encrypt_calls(&self) -> usize {
        self.encrypt_calls.load(Ordering::SeqCst)
    }

    /// Number of decrypt calls received.
    pub fn decrypt_calls(&self) -> usize {
        self.decrypt_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KmsClient for MockKms {
    async fn encrypt(
        &self,
        plaintext: &[u8],
        _key_id: &str,
        _context: Option<&EncryptionContext>,
    ) -> Result<Vec<u8>, KmsError> {
        self.encrypt_calls.fetch_add(1, Ordering::SeqCst);
        self.encrypt.lock().respond(plaintext)
    }

    async fn decrypt(
        &self,
        ciphertext: &[u8],
        _key_id: &str,
        _context: Option<&EncryptionContext>,
    ) -> Result<Vec<u8>, KmsError> {
        self.decrypt_calls.fetch_add(1, Ordering::SeqCst);
        self.decrypt.lock().respond(ciphertext)
    }
}
