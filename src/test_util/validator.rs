use anyhow::bail;

use crate::rpc::validator::{Validator, ValidatorState};

/// accepts every acknowledgement, answering with a fixed body
pub struct AcceptingValidator;

impl AcceptingValidator {
    pub const ACKNOWLEDGEMENT: &'static [u8] = b"ack";
}

impl Validator for AcceptingValidator {
    fn handshake(&self, data: Option<&[u8]>) -> Vec<u8> {
        data.map(|d| d.to_vec()).unwrap_or_default()
    }

    fn acknowledgement(&self, _received: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(Self::ACKNOWLEDGEMENT.to_vec())
    }

    fn verify_acknowledgement(&self, _received: &[u8]) -> ValidatorState {
        ValidatorState::Success
    }
}

/// rejects every acknowledgement
pub struct RejectingValidator;

impl Validator for RejectingValidator {
    fn handshake(&self, data: Option<&[u8]>) -> Vec<u8> {
        data.map(|d| d.to_vec()).unwrap_or_default()
    }

    fn acknowledgement(&self, _received: &[u8]) -> anyhow::Result<Vec<u8>> {
        bail!("rejected")
    }

    fn verify_acknowledgement(&self, _received: &[u8]) -> ValidatorState {
        ValidatorState::Failure
    }
}
