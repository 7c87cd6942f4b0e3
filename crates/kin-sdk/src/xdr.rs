// ============================================================================
// KIN-SDK - Transaction XDR
// ============================================================================
// Kin runs the pre-protocol-13 Stellar format:
//
//   Transaction  = source AccountID, fee u32, seqNum i64, timeBounds*,
//                  memo, operations<100>, ext (0)
//   Envelope     = Transaction + DecoratedSignature<20>  (no type prefix)
//   Hash         = sha256(network_id || ENVELOPE_TYPE_TX || tx)
//
// Only the operations the SDK builds or simplifies are understood:
// CreateAccount, Payment and ChangeTrust. Anything else fails to decode.
// ============================================================================

use crate::error::KinError;
use crate::keypair::Keypair;
use crate::strkey::{decode_address, encode_address};
use crate::Result;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const ENVELOPE_TYPE_TX: u32 = 2;
pub const MAX_OPERATIONS: usize = 100;
pub const MAX_SIGNATURES: usize = 20;
pub const MAX_MEMO_TEXT: usize = 28;

/// Largest trustline limit ("922337203685.4775807")
pub const MAX_TRUST_LIMIT: i64 = i64::MAX;

// ============================================================================
// TRANSACTION TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Asset {
    Native,
    CreditAlphaNum4 { code: String, issuer: String },
    CreditAlphaNum12 { code: String, issuer: String },
}

impl Asset {
    pub fn native() -> Self {
        Asset::Native
    }

    /// Picks the 4 or 12 character variant from the code length
    pub fn credit(code: &str, issuer: &str) -> Self {
        if code.len() <= 4 {
            Asset::CreditAlphaNum4 {
                code: code.to_string(),
                issuer: issuer.to_string(),
            }
        } else {
            Asset::CreditAlphaNum12 {
                code: code.to_string(),
                issuer: issuer.to_string(),
            }
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Asset::Native)
    }

    /// Asset code; the native asset is KIN
    pub fn code(&self) -> &str {
        match self {
            Asset::Native => "KIN",
            Asset::CreditAlphaNum4 { code, .. } | Asset::CreditAlphaNum12 { code, .. } => code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Memo {
    #[default]
    None,
    Text(String),
    Id(u64),
    Hash([u8; 32]),
    Return([u8; 32]),
}

impl Memo {
    /// Horizon's name for the memo type
    pub fn type_name(&self) -> &'static str {
        match self {
            Memo::None => "none",
            Memo::Text(_) => "text",
            Memo::Id(_) => "id",
            Memo::Hash(_) => "hash",
            Memo::Return(_) => "return",
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Memo::Text(text) => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationBody {
    CreateAccount {
        destination: String,
        starting_balance: i64,
    },
    Payment {
        destination: String,
        asset: Asset,
        amount: i64,
    },
    ChangeTrust {
        asset: Asset,
        limit: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Overrides the transaction source for this operation
    pub source_account: Option<String>,
    pub body: OperationBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBounds {
    pub min_time: u64,
    pub max_time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub source_account: String,
    /// Total fee in stroops
    pub fee: u32,
    pub sequence: i64,
    pub time_bounds: Option<TimeBounds>,
    pub memo: Memo,
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoratedSignature {
    pub hint: [u8; 4],
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEnvelope {
    pub tx: Transaction,
    pub signatures: Vec<DecoratedSignature>,
}

// ============================================================================
// TRANSACTION
// ============================================================================

impl Transaction {
    pub fn to_xdr(&self) -> Result<Vec<u8>> {
        let mut w = XdrWriter::default();
        self.write(&mut w)?;
        Ok(w.into_bytes())
    }

    /// Hash signed by every signer: sha256(network_id || ENVELOPE_TYPE_TX || tx)
    pub fn hash(&self, network_id: &[u8; 32]) -> Result<[u8; 32]> {
        let mut hasher = Sha256::new();
        hasher.update(network_id);
        hasher.update(ENVELOPE_TYPE_TX.to_be_bytes());
        hasher.update(self.to_xdr()?);
        Ok(hasher.finalize().into())
    }

    fn write(&self, w: &mut XdrWriter) -> Result<()> {
        if self.operations.is_empty() {
            return Err(KinError::InvalidTransaction("no operations".to_string()));
        }
        if self.operations.len() > MAX_OPERATIONS {
            return Err(KinError::InvalidTransaction(format!(
                "{} operations, maximum is {}",
                self.operations.len(),
                MAX_OPERATIONS
            )));
        }

        // Source account
        w.write_account_id(&self.source_account)?;

        // Fee
        w.write_u32(self.fee);

        // Sequence number
        w.write_i64(self.sequence);

        // TimeBounds*
        match &self.time_bounds {
            Some(bounds) => {
                w.write_bool(true);
                w.write_u64(bounds.min_time);
                w.write_u64(bounds.max_time);
            }
            None => w.write_bool(false),
        }

        write_memo(w, &self.memo)?;

        // Operations
        w.write_u32(self.operations.len() as u32);
        for op in &self.operations {
            write_operation(w, op)?;
        }

        // Ext
        w.write_u32(0);
        Ok(())
    }

    fn read(r: &mut XdrReader<'_>) -> Result<Self> {
        let source_account = r.read_account_id()?;
        let fee = r.read_u32()?;
        let sequence = r.read_i64()?;

        let time_bounds = if r.read_bool()? {
            Some(TimeBounds {
                min_time: r.read_u64()?,
                max_time: r.read_u64()?,
            })
        } else {
            None
        };

        let memo = read_memo(r)?;

        let count = r.read_u32()? as usize;
        if count > MAX_OPERATIONS {
            return Err(KinError::Codec(format!("{} operations", count)));
        }
        let mut operations = Vec::with_capacity(count);
        for _ in 0..count {
            operations.push(read_operation(r)?);
        }

        match r.read_u32()? {
            0 => {}
            v => return Err(KinError::Codec(format!("unsupported transaction ext {}", v))),
        }

        Ok(Self {
            source_account,
            fee,
            sequence,
            time_bounds,
            memo,
            operations,
        })
    }
}

// ============================================================================
// ENVELOPE
// ============================================================================

impl TransactionEnvelope {
    pub fn new(tx: Transaction) -> Self {
        Self {
            tx,
            signatures: Vec::new(),
        }
    }

    pub fn hash(&self, network_id: &[u8; 32]) -> Result<[u8; 32]> {
        self.tx.hash(network_id)
    }

    /// Append a signature over the transaction hash
    pub fn sign(&mut self, keypair: &Keypair, network_id: &[u8; 32]) -> Result<()> {
        if self.signatures.len() >= MAX_SIGNATURES {
            return Err(KinError::InvalidTransaction("too many signatures".to_string()));
        }
        let hash = self.hash(network_id)?;
        self.signatures.push(keypair.sign(&hash));
        Ok(())
    }

    pub fn to_xdr(&self) -> Result<Vec<u8>> {
        let mut w = XdrWriter::default();
        self.tx.write(&mut w)?;
        w.write_u32(self.signatures.len() as u32);
        for sig in &self.signatures {
            w.write_fixed(&sig.hint);
            w.write_var_opaque(&sig.signature, 64)?;
        }
        Ok(w.into_bytes())
    }

    pub fn to_base64(&self) -> Result<String> {
        Ok(BASE64.encode(self.to_xdr()?))
    }

    pub fn from_xdr(bytes: &[u8]) -> Result<Self> {
        let mut r = XdrReader::new(bytes);
        let tx = Transaction::read(&mut r)?;

        let count = r.read_u32()? as usize;
        if count > MAX_SIGNATURES {
            return Err(KinError::Codec(format!("{} signatures", count)));
        }
        let mut signatures = Vec::with_capacity(count);
        for _ in 0..count {
            let hint = r.read_fixed::<4>()?;
            let signature = r.read_var_opaque(64)?;
            signatures.push(DecoratedSignature { hint, signature });
        }

        r.finish()?;
        Ok(Self { tx, signatures })
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        Self::from_xdr(&BASE64.decode(encoded.trim())?)
    }
}

// ============================================================================
// XDR PIECES
// ============================================================================

fn write_memo(w: &mut XdrWriter, memo: &Memo) -> Result<()> {
    match memo {
        Memo::None => {
            // MEMO_NONE = 0
            w.write_u32(0);
        }
        Memo::Text(text) => {
            // MEMO_TEXT = 1
            w.write_u32(1);
            w.write_var_opaque(text.as_bytes(), MAX_MEMO_TEXT)
                .map_err(|_| KinError::MemoTooLong {
                    length: text.len(),
                    cap: MAX_MEMO_TEXT,
                })?;
        }
        Memo::Id(id) => {
            // MEMO_ID = 2
            w.write_u32(2);
            w.write_u64(*id);
        }
        Memo::Hash(hash) => {
            // MEMO_HASH = 3
            w.write_u32(3);
            w.write_fixed(hash);
        }
        Memo::Return(hash) => {
            // MEMO_RETURN = 4
            w.write_u32(4);
            w.write_fixed(hash);
        }
    }
    Ok(())
}

fn read_memo(r: &mut XdrReader<'_>) -> Result<Memo> {
    Ok(match r.read_u32()? {
        0 => Memo::None,
        1 => {
            let bytes = r.read_var_opaque(MAX_MEMO_TEXT)?;
            let text = String::from_utf8(bytes)
                .map_err(|_| KinError::Codec("memo text is not UTF-8".to_string()))?;
            Memo::Text(text)
        }
        2 => Memo::Id(r.read_u64()?),
        3 => Memo::Hash(r.read_fixed::<32>()?),
        4 => Memo::Return(r.read_fixed::<32>()?),
        t => return Err(KinError::Codec(format!("unknown memo type {}", t))),
    })
}

fn write_operation(w: &mut XdrWriter, op: &Operation) -> Result<()> {
    // Source account override
    match &op.source_account {
        Some(source) => {
            w.write_bool(true);
            w.write_account_id(source)?;
        }
        None => w.write_bool(false),
    }

    match &op.body {
        OperationBody::CreateAccount {
            destination,
            starting_balance,
        } => {
            // CREATE_ACCOUNT = 0
            w.write_u32(0);
            w.write_account_id(destination)?;
            w.write_i64(*starting_balance);
        }
        OperationBody::Payment {
            destination,
            asset,
            amount,
        } => {
            // PAYMENT = 1
            w.write_u32(1);
            w.write_account_id(destination)?;
            write_asset(w, asset)?;
            w.write_i64(*amount);
        }
        OperationBody::ChangeTrust { asset, limit } => {
            // CHANGE_TRUST = 6
            w.write_u32(6);
            write_asset(w, asset)?;
            w.write_i64(*limit);
        }
    }
    Ok(())
}

fn read_operation(r: &mut XdrReader<'_>) -> Result<Operation> {
    let source_account = if r.read_bool()? {
        Some(r.read_account_id()?)
    } else {
        None
    };

    let body = match r.read_u32()? {
        0 => OperationBody::CreateAccount {
            destination: r.read_account_id()?,
            starting_balance: r.read_i64()?,
        },
        1 => OperationBody::Payment {
            destination: r.read_account_id()?,
            asset: read_asset(r)?,
            amount: r.read_i64()?,
        },
        6 => OperationBody::ChangeTrust {
            asset: read_asset(r)?,
            limit: r.read_i64()?,
        },
        t => return Err(KinError::Codec(format!("unsupported operation type {}", t))),
    };

    Ok(Operation {
        source_account,
        body,
    })
}

fn write_asset(w: &mut XdrWriter, asset: &Asset) -> Result<()> {
    match asset {
        Asset::Native => {
            // ASSET_TYPE_NATIVE = 0
            w.write_u32(0);
        }
        Asset::CreditAlphaNum4 { code, issuer } => {
            // ASSET_TYPE_CREDIT_ALPHANUM4 = 1
            w.write_u32(1);
            w.write_fixed(&asset_code::<4>(code)?);
            w.write_account_id(issuer)?;
        }
        Asset::CreditAlphaNum12 { code, issuer } => {
            // ASSET_TYPE_CREDIT_ALPHANUM12 = 2
            w.write_u32(2);
            w.write_fixed(&asset_code::<12>(code)?);
            w.write_account_id(issuer)?;
        }
    }
    Ok(())
}

fn read_asset(r: &mut XdrReader<'_>) -> Result<Asset> {
    Ok(match r.read_u32()? {
        0 => Asset::Native,
        1 => Asset::CreditAlphaNum4 {
            code: trim_code(&r.read_fixed::<4>()?),
            issuer: r.read_account_id()?,
        },
        2 => Asset::CreditAlphaNum12 {
            code: trim_code(&r.read_fixed::<12>()?),
            issuer: r.read_account_id()?,
        },
        t => return Err(KinError::Codec(format!("unknown asset type {}", t))),
    })
}

/// Right-pad an asset code with zero bytes
fn asset_code<const N: usize>(code: &str) -> Result<[u8; N]> {
    let bytes = code.as_bytes();
    if bytes.is_empty() || bytes.len() > N || !bytes.iter().all(|b| b.is_ascii_alphanumeric()) {
        return Err(KinError::InvalidTransaction(format!("bad asset code {:?}", code)));
    }
    let mut padded = [0u8; N];
    padded[..bytes.len()].copy_from_slice(bytes);
    Ok(padded)
}

fn trim_code(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|b| **b != 0)
        .map(|b| *b as char)
        .collect()
}

// ============================================================================
// WRITER / READER
// ============================================================================

#[derive(Default)]
struct XdrWriter {
    buf: Vec<u8>,
}

impl XdrWriter {
    fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn write_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn write_bool(&mut self, v: bool) {
        self.write_u32(u32::from(v));
    }

    /// Fixed-length opaque, padded to a 4-byte boundary
    fn write_fixed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        self.pad(bytes.len());
    }

    fn write_var_opaque(&mut self, bytes: &[u8], max: usize) -> Result<()> {
        if bytes.len() > max {
            return Err(KinError::Codec(format!(
                "opaque of {} bytes exceeds {}",
                bytes.len(),
                max
            )));
        }
        self.write_u32(bytes.len() as u32);
        self.write_fixed(bytes);
        Ok(())
    }

    fn write_account_id(&mut self, address: &str) -> Result<()> {
        let key = decode_address(address)?;
        // PUBLIC_KEY_TYPE_ED25519 = 0
        self.write_u32(0);
        self.buf.extend_from_slice(&key);
        Ok(())
    }

    fn pad(&mut self, len: usize) {
        let padding = (4 - len % 4) % 4;
        self.buf.extend(std::iter::repeat(0).take(padding));
    }
}

struct XdrReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> XdrReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| KinError::Codec("unexpected end of data".to_string()))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_fixed<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        self.skip_padding(N)?;
        Ok(out)
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_fixed::<4>()?))
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.read_fixed::<8>()?))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.read_fixed::<8>()?))
    }

    fn read_bool(&mut self) -> Result<bool> {
        match self.read_u32()? {
            0 => Ok(false),
            1 => Ok(true),
            v => Err(KinError::Codec(format!("invalid bool {}", v))),
        }
    }

    fn read_var_opaque(&mut self, max: usize) -> Result<Vec<u8>> {
        let len = self.read_u32()? as usize;
        if len > max {
            return Err(KinError::Codec(format!("opaque of {} bytes exceeds {}", len, max)));
        }
        let bytes = self.take(len)?.to_vec();
        self.skip_padding(len)?;
        Ok(bytes)
    }

    fn read_account_id(&mut self) -> Result<String> {
        match self.read_u32()? {
            0 => Ok(encode_address(&self.read_fixed::<32>()?)),
            t => Err(KinError::Codec(format!("unknown public key type {}", t))),
        }
    }

    fn skip_padding(&mut self, len: usize) -> Result<()> {
        let padding = (4 - len % 4) % 4;
        if self.take(padding)?.iter().any(|b| *b != 0) {
            return Err(KinError::Codec("non-zero padding".to_string()));
        }
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        if self.pos != self.data.len() {
            return Err(KinError::Codec(format!(
                "{} trailing bytes",
                self.data.len() - self.pos
            )));
        }
        Ok(())
    }
}
