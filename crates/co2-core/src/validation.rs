//! Context-free (phase B) and stateful (phase C) transaction validation
//! (spec §4.3).
//!
//! Phase B checks a transaction in isolation: shape, amounts, and
//! kind-specific structural rules. Phase C checks a transaction against a
//! UTXO index and certificate ledger at a specific connection point,
//! producing the [`TxEffect`] the chain manager folds into its block-level
//! [`crate::utxo::Diff`] and [`crate::ledger::LedgerDiff`].

use std::collections::{BTreeMap, HashSet};

use crate::address;
use crate::constants::MAX_MONEY;
use crate::crypto;
use crate::error::TxError;
use crate::ledger::Ledger;
use crate::types::{Certificate, CoinState, Hash256, OutPoint, Project, Transaction, TxKind, TxOutput, UtxoEntry};
use crate::utxo::UtxoIndex;

/// Metadata keys carried by `ASSIGN_CERT` transactions — the frozen
/// canonical layout (DESIGN.md "canonical metadata byte layout"). Every
/// value is UTF-8 except `TOTAL_AMOUNT` (8-byte little-endian u64) and
/// `ISSUE_DATE` (4-byte little-endian u32).
pub mod cert_metadata_keys {
    pub const CERTIFICATE_ID: &str = "certificate_id";
    pub const PROJECT_ID: &str = "project_id";
    pub const PROJECT_NAME: &str = "project_name";
    pub const PROJECT_TYPE: &str = "project_type";
    pub const PROJECT_LOCATION: &str = "project_location";
    pub const STANDARD: &str = "standard";
    pub const LOCATION: &str = "location";
    pub const ISSUE_DATE: &str = "issue_date";
    pub const ISSUER_ADDRESS: &str = "issuer_address";
    pub const TOTAL_AMOUNT: &str = "total_amount";
}

/// Metadata key a coinbase transaction carries its height under (spec §4.3:
/// "exactly one dummy input ... height in scriptless metadata"), 4-byte
/// little-endian `u32`. Distinguishes otherwise-identical coinbases at
/// different heights so their txids, and hence their `OutPoint`s, never
/// collide (the BIP34 hazard behind the block-level duplicate-coinbase
/// check).
pub const COINBASE_HEIGHT_KEY: &str = "height";

/// The UTXO/ledger delta a single valid transaction contributes to its
/// containing block.
#[derive(Debug, Clone, Default)]
pub struct TxEffect {
    /// `sum(inputs) - sum(outputs)`; zero for coinbase.
    pub fee: u64,
    pub utxo_removes: Vec<(OutPoint, UtxoEntry)>,
    pub utxo_inserts: Vec<(OutPoint, UtxoEntry)>,
    /// `(certificate_id, before, after)` — `before` is `None` for a newly
    /// minted certificate.
    pub certificate_update: Option<(String, Option<Certificate>, Certificate)>,
    pub project_created: Option<(String, Project)>,
}

/// `CERT-\d{4}-\d{4,}`.
pub fn is_valid_certificate_id(id: &str) -> bool {
    let Some(rest) = id.strip_prefix("CERT-") else {
        return false;
    };
    let Some((year, seq)) = rest.split_once('-') else {
        return false;
    };
    year.len() == 4
        && year.bytes().all(|b| b.is_ascii_digit())
        && seq.len() >= 4
        && seq.bytes().all(|b| b.is_ascii_digit())
}

fn read_metadata_string(tx: &Transaction, key: &str) -> Result<String, TxError> {
    let bytes = tx
        .metadata
        .get(key)
        .ok_or_else(|| TxError::MalformedCertificateMetadata(format!("missing key {key}")))?;
    String::from_utf8(bytes.clone())
        .map_err(|_| TxError::MalformedCertificateMetadata(format!("key {key} is not utf-8")))
}

fn read_metadata_u64(tx: &Transaction, key: &str) -> Result<u64, TxError> {
    let bytes = tx
        .metadata
        .get(key)
        .ok_or_else(|| TxError::MalformedCertificateMetadata(format!("missing key {key}")))?;
    let arr: [u8; 8] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| TxError::MalformedCertificateMetadata(format!("key {key} is not 8 bytes")))?;
    Ok(u64::from_le_bytes(arr))
}

/// Reads a coinbase's height out of its metadata (spec §4.3's "height in
/// scriptless metadata"), 4-byte little-endian. Missing or malformed is a
/// structural defect of the coinbase itself, not of certificate metadata.
fn read_coinbase_height(tx: &Transaction) -> Result<u32, TxError> {
    let bytes = tx
        .metadata
        .get(COINBASE_HEIGHT_KEY)
        .ok_or(TxError::MalformedKind(TxKind::Coinbase))?;
    let arr: [u8; 4] = bytes.as_slice().try_into().map_err(|_| TxError::MalformedKind(TxKind::Coinbase))?;
    Ok(u32::from_le_bytes(arr))
}

fn read_metadata_u32(tx: &Transaction, key: &str) -> Result<u32, TxError> {
    let bytes = tx
        .metadata
        .get(key)
        .ok_or_else(|| TxError::MalformedCertificateMetadata(format!("missing key {key}")))?;
    let arr: [u8; 4] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| TxError::MalformedCertificateMetadata(format!("key {key} is not 4 bytes")))?;
    Ok(u32::from_le_bytes(arr))
}

// ---------------------------------------------------------------------
// Phase B — context-free structural validation
// ---------------------------------------------------------------------

/// Context-free structural checks shared by every kind, then dispatch to
/// the kind-specific rules (spec §4.3 phase B).
pub fn validate_tx_structure(tx: &Transaction) -> Result<(), TxError> {
    if tx.outputs.is_empty() {
        return Err(TxError::EmptyOutputs);
    }
    for (index, out) in tx.outputs.iter().enumerate() {
        if out.amount == 0 {
            return Err(TxError::NonPositiveAmount { index });
        }
        if !out.respects_certificate_invariant() {
            return Err(TxError::MalformedKind(tx.kind));
        }
    }
    let total = tx.total_output_value().ok_or(TxError::AmountExceedsMaxMoney)?;
    if total > MAX_MONEY {
        return Err(TxError::AmountExceedsMaxMoney);
    }

    let mut seen = HashSet::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        if !seen.insert(&input.previous_output) {
            return Err(TxError::DuplicateInput(input.previous_output.to_string()));
        }
    }

    match tx.kind {
        TxKind::Coinbase => validate_coinbase_structure(tx),
        TxKind::Transfer => validate_transfer_structure(tx),
        TxKind::AssignCert => validate_assign_cert_structure(tx),
        TxKind::AssignCompensation => validate_assign_compensation_structure(tx),
        TxKind::Burn => validate_burn_structure(tx),
    }
}

fn validate_coinbase_structure(tx: &Transaction) -> Result<(), TxError> {
    if tx.inputs.len() != 1 {
        return Err(TxError::MalformedKind(TxKind::Coinbase));
    }
    let input = &tx.inputs[0];
    if !input.previous_output.is_null() || !input.signature.is_empty() || !input.pubkey.is_empty() {
        return Err(TxError::MalformedKind(TxKind::Coinbase));
    }
    if tx.outputs.iter().any(|o| o.coin_state != CoinState::Spendable) {
        return Err(TxError::MalformedKind(TxKind::Coinbase));
    }
    read_coinbase_height(tx)?;
    Ok(())
}

fn validate_transfer_structure(tx: &Transaction) -> Result<(), TxError> {
    if tx.inputs.is_empty() {
        return Err(TxError::EmptyInputs);
    }
    if tx.inputs.iter().any(|i| i.previous_output.is_null()) {
        return Err(TxError::MalformedKind(TxKind::Transfer));
    }
    if tx.outputs.iter().any(|o| o.coin_state != CoinState::Spendable) {
        return Err(TxError::MalformedKind(TxKind::Transfer));
    }
    Ok(())
}

fn validate_assign_cert_structure(tx: &Transaction) -> Result<(), TxError> {
    if tx.inputs.is_empty() {
        return Err(TxError::EmptyInputs);
    }

    let certificate_id = read_metadata_string(tx, cert_metadata_keys::CERTIFICATE_ID)?;
    if !is_valid_certificate_id(&certificate_id) {
        return Err(TxError::MalformedCertificateMetadata(format!(
            "certificate_id {certificate_id} does not match CERT-\\d{{4}}-\\d{{4,}}"
        )));
    }
    read_metadata_string(tx, cert_metadata_keys::PROJECT_ID)?;
    read_metadata_string(tx, cert_metadata_keys::STANDARD)?;
    read_metadata_string(tx, cert_metadata_keys::LOCATION)?;
    read_metadata_string(tx, cert_metadata_keys::ISSUER_ADDRESS)?;
    read_metadata_u32(tx, cert_metadata_keys::ISSUE_DATE)?;
    read_metadata_u64(tx, cert_metadata_keys::TOTAL_AMOUNT)?;

    let certified: Vec<&TxOutput> = tx
        .outputs
        .iter()
        .filter(|o| o.coin_state == CoinState::Certified)
        .collect();
    if certified.is_empty() {
        return Err(TxError::MalformedKind(TxKind::AssignCert));
    }
    if certified
        .iter()
        .any(|o| o.certificate_id.as_deref() != Some(certificate_id.as_str()))
    {
        return Err(TxError::MalformedCertificateMetadata(
            "CERTIFIED output bound to a different certificate_id".into(),
        ));
    }
    if tx
        .outputs
        .iter()
        .any(|o| !matches!(o.coin_state, CoinState::Spendable | CoinState::Certified))
    {
        return Err(TxError::MalformedKind(TxKind::AssignCert));
    }
    Ok(())
}

fn validate_assign_compensation_structure(tx: &Transaction) -> Result<(), TxError> {
    if tx.inputs.is_empty() {
        return Err(TxError::EmptyInputs);
    }
    if tx.outputs.iter().any(|o| o.coin_state != CoinState::Compensated) {
        return Err(TxError::MalformedKind(TxKind::AssignCompensation));
    }
    Ok(())
}

fn validate_burn_structure(tx: &Transaction) -> Result<(), TxError> {
    if tx.inputs.is_empty() {
        return Err(TxError::EmptyInputs);
    }
    let burn = address::burn_address().encode();
    if tx
        .outputs
        .iter()
        .any(|o| o.address != burn || o.coin_state != CoinState::Compensated)
    {
        return Err(TxError::MalformedKind(TxKind::Burn));
    }
    if tx.output_certificate_ids().len() > 1 {
        return Err(TxError::MixedCertificateInputs);
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Phase C — stateful contextual validation
// ---------------------------------------------------------------------

/// Whether a UTXO in `state` may be spent by a transaction of `kind`
/// (spec §4.3's coin-state transition table — the only legal transitions).
fn coin_state_allowed_for_spend(kind: TxKind, state: CoinState) -> bool {
    matches!(
        (kind, state),
        (TxKind::Transfer, CoinState::Spendable)
            | (TxKind::AssignCert, CoinState::Spendable)
            | (TxKind::AssignCompensation, CoinState::Certified)
            | (TxKind::Burn, CoinState::Spendable)
    )
}

/// Credit `increment` against a certificate's `compensated_amount`, failing
/// if it would exceed `assigned_amount` (spec §4.3, §8 scenario 4).
fn compensation_ledger_effect(
    certificate_id: &str,
    increment: u64,
    ledger: &Ledger,
) -> Result<(String, Option<Certificate>, Certificate), TxError> {
    let cert = ledger
        .certificate(certificate_id)
        .ok_or_else(|| TxError::UnknownCertificate(certificate_id.to_string()))?
        .clone();
    let new_compensated = cert
        .compensated_amount
        .checked_add(increment)
        .ok_or_else(|| TxError::CertOvercompensated(certificate_id.to_string()))?;
    if new_compensated > cert.assigned_amount {
        return Err(TxError::CertOvercompensated(certificate_id.to_string()));
    }
    let mut updated = cert.clone();
    updated.compensated_amount = new_compensated;
    Ok((certificate_id.to_string(), Some(cert), updated))
}

/// Mint the certificate (and, on first reference, the project) an
/// `ASSIGN_CERT` transaction declares (spec §4.3: `certificate_id` must be
/// unused — this kind only ever mints, never tops up).
fn assign_cert_ledger_effect(
    tx: &Transaction,
    ledger: &Ledger,
    block_height: u32,
) -> Result<
    (
        Option<(String, Option<Certificate>, Certificate)>,
        Option<(String, Project)>,
    ),
    TxError,
> {
    let certificate_id = read_metadata_string(tx, cert_metadata_keys::CERTIFICATE_ID)?;
    if ledger.contains_certificate(&certificate_id) {
        return Err(TxError::CertIdReused(certificate_id));
    }

    let project_id = read_metadata_string(tx, cert_metadata_keys::PROJECT_ID)?;
    let standard = read_metadata_string(tx, cert_metadata_keys::STANDARD)?;
    let location = read_metadata_string(tx, cert_metadata_keys::LOCATION)?;
    let issuer_address = read_metadata_string(tx, cert_metadata_keys::ISSUER_ADDRESS)?;
    let issue_date = read_metadata_u32(tx, cert_metadata_keys::ISSUE_DATE)?;
    let total_amount = read_metadata_u64(tx, cert_metadata_keys::TOTAL_AMOUNT)?;

    let assigned_amount: u64 = tx
        .outputs
        .iter()
        .filter(|o| o.coin_state == CoinState::Certified)
        .map(|o| o.amount)
        .sum();
    if assigned_amount > total_amount {
        return Err(TxError::CertOverassigned(certificate_id));
    }

    let certificate = Certificate {
        certificate_id: certificate_id.clone(),
        project_id: project_id.clone(),
        total_amount,
        assigned_amount,
        compensated_amount: 0,
        issuer_address,
        standard,
        location,
        issue_date,
        metadata: BTreeMap::new(),
    };

    let project_created = if ledger.contains_project(&project_id) {
        None
    } else {
        let name = read_metadata_string(tx, cert_metadata_keys::PROJECT_NAME)?;
        let project_type = read_metadata_string(tx, cert_metadata_keys::PROJECT_TYPE)?;
        let proj_location = read_metadata_string(tx, cert_metadata_keys::PROJECT_LOCATION)?;
        Some((
            project_id.clone(),
            Project {
                project_id,
                name,
                project_type,
                location: proj_location,
                created_height: block_height,
            },
        ))
    };

    Ok((Some((certificate_id, None, certificate)), project_created))
}

/// Stateful (phase C) validation against the UTXO index and ledger at the
/// connection point, producing the effect to fold into the block's diffs.
///
/// `spent_in_block` carries outpoints already consumed by earlier
/// transactions in the same block, catching intra-block double-spends
/// that a plain UTXO lookup would miss.
pub fn validate_tx_contextual(
    tx: &Transaction,
    txid: Hash256,
    block_height: u32,
    utxo: &UtxoIndex,
    ledger: &Ledger,
    spent_in_block: &HashSet<OutPoint>,
) -> Result<TxEffect, TxError> {
    if tx.is_coinbase() {
        let encoded_height = read_coinbase_height(tx)?;
        if encoded_height != block_height {
            return Err(TxError::CoinbaseHeightMismatch { expected: block_height, got: encoded_height });
        }
        let utxo_inserts = tx
            .outputs
            .iter()
            .enumerate()
            .map(|(index, out)| {
                (
                    OutPoint { txid, index: index as u32 },
                    UtxoEntry { output: out.clone(), block_height, is_coinbase: true },
                )
            })
            .collect();
        return Ok(TxEffect { utxo_inserts, ..Default::default() });
    }

    let mut utxo_removes = Vec::with_capacity(tx.inputs.len());
    let mut input_total: u64 = 0;
    let mut spent_certificate_id: Option<String> = None;

    for (index, input) in tx.inputs.iter().enumerate() {
        let outpoint = &input.previous_output;
        if spent_in_block.contains(outpoint) {
            return Err(TxError::UnknownUtxo(outpoint.to_string()));
        }
        let entry = utxo
            .get(outpoint)
            .ok_or_else(|| TxError::UnknownUtxo(outpoint.to_string()))?;

        if entry.is_coinbase && !entry.is_mature(block_height) {
            let confirmations = (block_height as u64).saturating_sub(entry.block_height as u64);
            return Err(TxError::ImmatureCoinbase { confirmations });
        }
        if !coin_state_allowed_for_spend(tx.kind, entry.output.coin_state) {
            return Err(TxError::CoinStateForbidden);
        }
        crypto::verify_transaction_input(tx, index, &entry.output.address)
            .map_err(|_| TxError::InvalidSignature { index })?;

        if let Some(cert_id) = &entry.output.certificate_id {
            match &spent_certificate_id {
                Some(existing) if existing != cert_id => {
                    return Err(TxError::MixedCertificateInputs);
                }
                _ => spent_certificate_id = Some(cert_id.clone()),
            }
        }

        input_total = input_total
            .checked_add(entry.output.amount)
            .ok_or(TxError::AmountExceedsMaxMoney)?;
        utxo_removes.push((outpoint.clone(), entry.clone()));
    }

    let output_total = tx.total_output_value().ok_or(TxError::AmountExceedsMaxMoney)?;
    if input_total < output_total {
        return Err(TxError::InsufficientInputValue {
            inputs: input_total,
            outputs: output_total,
        });
    }
    let fee = input_total - output_total;

    let utxo_inserts: Vec<_> = tx
        .outputs
        .iter()
        .enumerate()
        .map(|(index, out)| {
            (
                OutPoint { txid, index: index as u32 },
                UtxoEntry { output: out.clone(), block_height, is_coinbase: false },
            )
        })
        .collect();

    let (certificate_update, project_created) = match tx.kind {
        TxKind::Coinbase => unreachable!("coinbase handled above"),
        TxKind::Transfer => (None, None),
        TxKind::AssignCert => assign_cert_ledger_effect(tx, ledger, block_height)?,
        TxKind::AssignCompensation => {
            let cert_id = spent_certificate_id
                .ok_or_else(|| TxError::UnknownCertificate(String::new()))?;
            (Some(compensation_ledger_effect(&cert_id, output_total, ledger)?), None)
        }
        TxKind::Burn => match tx.output_certificate_ids().first() {
            Some(id) => {
                let credited: u64 = tx
                    .outputs
                    .iter()
                    .filter(|o| o.certificate_id.as_deref() == Some(*id))
                    .map(|o| o.amount)
                    .sum();
                (Some(compensation_ledger_effect(id, credited, ledger)?), None)
            }
            None => (None, None),
        },
    };

    Ok(TxEffect {
        fee,
        utxo_removes,
        utxo_inserts,
        certificate_update,
        project_created,
    })
}
