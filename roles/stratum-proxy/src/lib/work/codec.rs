//! Work unit codec.
//!
//! Pure functions that turn a [`Job`] plus an extranonce2 into an 80 byte block header in the
//! getwork representation, and rebuild a share from what a miner submits.
//!
//! getwork `data` is the header with every 32 bit word byte swapped, followed by the SHA-256
//! padding of an 80 byte message, 128 bytes in total.
use primitive_types::U256;
use sha2::{
    compress256,
    digest::generic_array::{typenum::U64, GenericArray},
    Digest, Sha256,
};

use super::{
    job::{Job, SessionParams},
    target::{hash_to_u256, target_from_bits, target_to_difficulty, target_to_le_hex},
};
use crate::{error::ProxyError, utils::unix_time};

pub const HEADER_SIZE: usize = 80;

/// SHA-256 padding of an 80 byte message, already word swapped.
pub const GETWORK_PADDING: &str =
    "000000800000000000000000000000000000000000000000000000000000000000000000000000000000000080020000";

/// The constant `hash1` field of a getwork response.
pub const GETWORK_HASH1: &str = "00000000000000000000000000000000000000000000000000000000000000000000008000000000000000000000000000000000000000000000000000010000";

const SHA256_INITIAL_STATE: [u32; 8] = [
    0x6a09e667, 0xbb67ae85, 0x3c6ef372, 0xa54ff53a, 0x510e527f, 0x9b05688c, 0x1f83d9ab, 0x5be0cd19,
];

/// One getwork work unit, derived from a job for a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub job_id: String,
    pub extranonce2: Vec<u8>,
    pub ntime: u32,
    /// Header in consensus byte order, nonce zeroed.
    pub header: [u8; HEADER_SIZE],
    pub merkle_root: [u8; 32],
    pub target: U256,
    pub midstate: Option<[u32; 8]>,
}

impl WorkUnit {
    pub fn data_hex(&self) -> String {
        getwork_data_hex(&self.header)
    }

    pub fn target_hex(&self) -> String {
        target_to_le_hex(self.target)
    }

    /// Midstate as eight little endian words, the layout getwork miners read.
    pub fn midstate_hex(&self) -> Option<String> {
        self.midstate.map(|state| {
            let bytes: Vec<u8> = state.iter().flat_map(|w| w.to_le_bytes()).collect();
            hex::encode(bytes)
        })
    }
}

/// A solution as submitted by a miner, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubmittedShare {
    pub job_id: String,
    pub extranonce2: Vec<u8>,
    pub ntime: u32,
    pub nonce: u32,
    /// Merkle root read from a getwork header, checked against the rebuilt one.
    pub merkle_root: Option<[u8; 32]>,
}

impl SubmittedShare {
    /// Identity used for duplicate detection.
    pub fn key(&self) -> ShareKey {
        ShareKey {
            job_id: self.job_id.clone(),
            extranonce2: self.extranonce2.clone(),
            ntime: self.ntime,
            nonce: self.nonce,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShareKey {
    pub job_id: String,
    pub extranonce2: Vec<u8>,
    pub ntime: u32,
    pub nonce: u32,
}

/// A share whose header was rebuilt from its job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedShare {
    pub job_id: String,
    pub extranonce2: Vec<u8>,
    pub ntime: u32,
    pub nonce: u32,
    pub header: [u8; HEADER_SIZE],
    pub merkle_root: [u8; 32],
    /// Double SHA-256 of the header, header byte order.
    pub hash: [u8; 32],
    /// Network `nbits` of the job.
    pub bits: u32,
    /// Share target the pool enforced when the job was issued.
    pub pool_target: U256,
}

impl ValidatedShare {
    pub fn meets(&self, target: U256) -> bool {
        hash_to_u256(&self.hash) <= target
    }

    pub fn meets_pool_target(&self) -> bool {
        self.meets(self.pool_target)
    }

    /// Difficulty the header hash actually reached.
    pub fn achieved_difficulty(&self) -> f64 {
        target_to_difficulty(hash_to_u256(&self.hash))
    }

    /// The share also solves the block.
    pub fn is_block_candidate(&self) -> bool {
        target_from_bits(self.bits).is_some_and(|target| self.meets(target))
    }

    /// Hash as block explorers print it.
    pub fn hash_display(&self) -> String {
        let mut h = self.hash;
        h.reverse();
        hex::encode(h)
    }
}

pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

/// Left pads with zeros or drops leading bytes so the result is exactly `size` bytes.
pub fn fit_extranonce2(extranonce2: &[u8], size: usize) -> Vec<u8> {
    if extranonce2.len() >= size {
        extranonce2[extranonce2.len() - size..].to_vec()
    } else {
        let mut out = vec![0u8; size - extranonce2.len()];
        out.extend_from_slice(extranonce2);
        out
    }
}

/// Big endian counter value fitted to `size` bytes.
pub fn extranonce2_from_counter(counter: u64, size: usize) -> Vec<u8> {
    fit_extranonce2(&counter.to_be_bytes(), size)
}

/// Builds the coinbase from the job and both extranonces and folds it through the merkle branch.
pub fn merkle_root(job: &Job, extranonce1: &[u8], extranonce2: &[u8]) -> [u8; 32] {
    let mut coinbase = Vec::with_capacity(
        job.coinbase1.len() + extranonce1.len() + extranonce2.len() + job.coinbase2.len(),
    );
    coinbase.extend_from_slice(&job.coinbase1);
    coinbase.extend_from_slice(extranonce1);
    coinbase.extend_from_slice(extranonce2);
    coinbase.extend_from_slice(&job.coinbase2);

    let mut root = sha256d(&coinbase);
    let mut concat = [0u8; 64];
    for node in &job.merkle_branch {
        concat[..32].copy_from_slice(&root);
        concat[32..].copy_from_slice(node);
        root = sha256d(&concat);
    }
    root
}

pub fn header(job: &Job, merkle_root: &[u8; 32], ntime: u32, nonce: u32) -> [u8; HEADER_SIZE] {
    let mut h = [0u8; HEADER_SIZE];
    h[0..4].copy_from_slice(&job.version.to_le_bytes());
    h[4..36].copy_from_slice(&job.prev_hash);
    h[36..68].copy_from_slice(merkle_root);
    h[68..72].copy_from_slice(&ntime.to_le_bytes());
    h[72..76].copy_from_slice(&job.bits.to_le_bytes());
    h[76..80].copy_from_slice(&nonce.to_le_bytes());
    h
}

/// SHA-256 state after compressing the first 64 header bytes.
pub fn midstate(header: &[u8; HEADER_SIZE]) -> [u32; 8] {
    let mut state = SHA256_INITIAL_STATE;
    let block = GenericArray::<u8, U64>::clone_from_slice(&header[..64]);
    compress256(&mut state, std::slice::from_ref(&block));
    state
}

pub fn getwork_data_hex(header: &[u8; HEADER_SIZE]) -> String {
    let mut swapped = [0u8; HEADER_SIZE];
    for (src, dst) in header.chunks(4).zip(swapped.chunks_mut(4)) {
        dst.copy_from_slice(src);
        dst.reverse();
    }
    let mut data = hex::encode(swapped);
    data.push_str(GETWORK_PADDING);
    data
}

/// Decodes the header from getwork `data`. Anything after the first 80 bytes is ignored.
pub fn parse_getwork_data(data: &str) -> Result<[u8; HEADER_SIZE], ProxyError> {
    if data.len() < HEADER_SIZE * 2 {
        return Err(ProxyError::MalformedSubmission(format!(
            "data is {} hex chars, expected at least {}",
            data.len(),
            HEADER_SIZE * 2
        )));
    }
    let prefix = data
        .get(..HEADER_SIZE * 2)
        .ok_or_else(|| ProxyError::MalformedSubmission("data is not ascii hex".into()))?;
    let bytes =
        hex::decode(prefix).map_err(|e| ProxyError::MalformedSubmission(e.to_string()))?;
    let mut header = [0u8; HEADER_SIZE];
    for (src, dst) in bytes.chunks(4).zip(header.chunks_mut(4)) {
        dst.copy_from_slice(src);
        dst.reverse();
    }
    Ok(header)
}

pub fn header_merkle_root(header: &[u8; HEADER_SIZE]) -> [u8; 32] {
    let mut root = [0u8; 32];
    root.copy_from_slice(&header[36..68]);
    root
}

pub fn header_ntime(header: &[u8; HEADER_SIZE]) -> u32 {
    u32::from_le_bytes([header[68], header[69], header[70], header[71]])
}

pub fn header_nonce(header: &[u8; HEADER_SIZE]) -> u32 {
    u32::from_le_bytes([header[76], header[77], header[78], header[79]])
}

/// Assembles a work unit. `extranonce2` is fitted to the session width, `ntime` defaults to
/// the job's own timestamp.
pub fn build(
    job: &Job,
    session: &SessionParams,
    extranonce2: &[u8],
    ntime: Option<u32>,
    target: U256,
    with_midstate: bool,
) -> WorkUnit {
    let extranonce2 = fit_extranonce2(extranonce2, session.extranonce2_size);
    let ntime = ntime.unwrap_or(job.ntime);
    let merkle_root = merkle_root(job, &session.extranonce1, &extranonce2);
    let header = header(job, &merkle_root, ntime, 0);
    let midstate = with_midstate.then(|| midstate(&header));
    WorkUnit {
        job_id: job.job_id.clone(),
        extranonce2,
        ntime,
        header,
        merkle_root,
        target,
        midstate,
    }
}

/// Rebuilds the header of a submitted share from its job and hashes it. `pool_target` is the
/// share target that applied to the job.
///
/// Fails on a wrong extranonce2 width, a share for another job, or a getwork header whose
/// merkle root does not match the job.
pub fn validate(
    job: &Job,
    session: &SessionParams,
    share: &SubmittedShare,
    pool_target: U256,
) -> Result<ValidatedShare, ProxyError> {
    if share.job_id != job.job_id {
        return Err(ProxyError::StaleJob);
    }
    if share.extranonce2.len() != session.extranonce2_size {
        return Err(ProxyError::InvalidExtranonce2Size {
            expected: session.extranonce2_size,
            actual: share.extranonce2.len(),
        });
    }
    let merkle_root = merkle_root(job, &session.extranonce1, &share.extranonce2);
    if let Some(submitted) = share.merkle_root {
        if submitted != merkle_root {
            return Err(ProxyError::MerkleMismatch);
        }
    }
    let header = header(job, &merkle_root, share.ntime, share.nonce);
    Ok(ValidatedShare {
        job_id: job.job_id.clone(),
        extranonce2: share.extranonce2.clone(),
        ntime: share.ntime,
        nonce: share.nonce,
        header,
        merkle_root,
        hash: sha256d(&header),
        bits: job.bits,
        pool_target,
    })
}

/// `ntime` for new work: pool time shifted by the local clock drift seen when the job arrived.
pub fn rolled_ntime(ntime_delta: i64) -> u32 {
    (unix_time() as i64 + ntime_delta).clamp(0, u32::MAX as i64) as u32
}

/// Brute forces a nonce whose header hash meets `target`. Test helper, only for easy targets.
#[cfg(test)]
pub(crate) fn grind_nonce(header: &[u8; HEADER_SIZE], target: U256) -> u32 {
    let mut header = *header;
    (0..=u32::MAX)
        .find(|nonce| {
            header[76..].copy_from_slice(&nonce.to_le_bytes());
            hash_to_u256(&sha256d(&header)) <= target
        })
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    // block 171874
    const HEADER_171874: &str = "01000000b3aec10cfb91d39d005f1a1e2a127a81e4af245fc0c4b6d088040000000000007e6ebbf2035cab9376138a28ef231f055fc9d6753fdb0f8309f3e9a02fa722ce1426674f87320b1a000187a2";

    fn header_171874() -> [u8; HEADER_SIZE] {
        hex::decode(HEADER_171874).unwrap().try_into().unwrap()
    }

    fn test_job() -> Job {
        Job {
            job_id: "abc".into(),
            prev_hash: [0x11; 32],
            coinbase1: hex::decode("01000000010000000000000000000000000000000000000000000000000000000000000000ffffffff20020862062f503253482f04b8864e5008").unwrap(),
            coinbase2: hex::decode("072f736c7573682f000000000100f2052a010000001976a914d23fcdf86f7e756a64a7a9688ef9903327048ed988ac00000000").unwrap(),
            merkle_branch: vec![[0x22; 32], [0x33; 32]],
            version: 0x2000_0000,
            bits: 0x1a0b3287,
            ntime: 0x504e86b9,
            clean: true,
        }
    }

    fn session() -> SessionParams {
        SessionParams::new(vec![0x08, 0x00, 0x00, 0x02], 4)
    }

    #[test]
    fn midstate_of_known_header() {
        let state = midstate(&header_171874());
        assert_eq!(
            state,
            [
                0xe48f544a, 0x9a3afa71, 0x45147113, 0x4df6c356, 0x82b40025, 0x4bfe0860,
                0xc99876bf, 0x4679ba4e
            ]
        );
    }

    #[test]
    fn hash_of_known_header() {
        let hash = sha256d(&header_171874());
        let mut display = hash;
        display.reverse();
        assert_eq!(
            hex::encode(display),
            "00000000000004b64108a8e4168cfaa890d62b8c061c6b74305b7f6cb2cf9fda"
        );
    }

    #[test]
    fn getwork_data_swaps_words_and_pads() {
        let data = getwork_data_hex(&header_171874());
        assert_eq!(data.len(), 256);
        assert!(data.starts_with("000000010cc1aeb39dd391fb"));
        assert!(data.ends_with(GETWORK_PADDING));
        let header = parse_getwork_data(&data).unwrap();
        assert_eq!(header, header_171874());
        assert_eq!(header_ntime(&header), 0x4f672614);
        assert_eq!(header_nonce(&header), 0xa2870100);
    }

    #[test]
    fn parse_rejects_short_or_bad_data() {
        assert!(parse_getwork_data("00").is_err());
        assert!(parse_getwork_data(&"zz".repeat(80)).is_err());
    }

    #[test]
    fn extranonce2_is_padded_or_truncated() {
        assert_eq!(fit_extranonce2(&[1, 2], 4), vec![0, 0, 1, 2]);
        assert_eq!(fit_extranonce2(&[1, 2, 3, 4, 5], 4), vec![2, 3, 4, 5]);
        assert_eq!(extranonce2_from_counter(0x0102, 3), vec![0, 1, 2]);
    }

    #[test]
    fn build_then_validate_round_trip() {
        let job = test_job();
        let session = session();
        let en2 = [0x00, 0x00, 0x00, 0x2a];
        let work = build(&job, &session, &en2, None, U256::MAX, true);
        assert!(work.midstate.is_some());
        assert_eq!(work.ntime, job.ntime);

        // independent merkle root
        let mut coinbase = job.coinbase1.clone();
        coinbase.extend_from_slice(&session.extranonce1);
        coinbase.extend_from_slice(&en2);
        coinbase.extend_from_slice(&job.coinbase2);
        let mut root: [u8; 32] = Sha256::digest(Sha256::digest(&coinbase)).into();
        for node in &job.merkle_branch {
            let mut concat = root.to_vec();
            concat.extend_from_slice(node);
            root = Sha256::digest(Sha256::digest(&concat)).into();
        }
        assert_eq!(work.merkle_root, root);

        // a miner solving the work unit sends back the header with its nonce
        let mut solved = parse_getwork_data(&work.data_hex()).unwrap();
        solved[76..80].copy_from_slice(&0xdeadbeefu32.to_le_bytes());
        let share = SubmittedShare {
            job_id: job.job_id.clone(),
            extranonce2: en2.to_vec(),
            ntime: header_ntime(&solved),
            nonce: header_nonce(&solved),
            merkle_root: Some(header_merkle_root(&solved)),
        };
        let validated = validate(&job, &session, &share, U256::MAX).unwrap();
        assert_eq!(validated.header, solved);
        assert_eq!(validated.merkle_root, root);
        assert_eq!(validated.hash, sha256d(&solved));
        assert!(validated.meets_pool_target());
        assert!(validated.achieved_difficulty() > 0.0);
        assert!(!validated.is_block_candidate());
    }

    #[test]
    fn validate_rejects_wrong_extranonce2_width() {
        let share = SubmittedShare {
            job_id: "abc".into(),
            extranonce2: vec![0; 3],
            ntime: 0,
            nonce: 0,
            merkle_root: None,
        };
        assert!(matches!(
            validate(&test_job(), &session(), &share, U256::MAX),
            Err(ProxyError::InvalidExtranonce2Size {
                expected: 4,
                actual: 3
            })
        ));
    }

    #[test]
    fn validate_rejects_foreign_merkle_root() {
        let share = SubmittedShare {
            job_id: "abc".into(),
            extranonce2: vec![0; 4],
            ntime: 0,
            nonce: 0,
            merkle_root: Some([0xaa; 32]),
        };
        assert!(matches!(
            validate(&test_job(), &session(), &share, U256::MAX),
            Err(ProxyError::MerkleMismatch)
        ));
    }

    #[test]
    fn midstate_hex_uses_little_endian_words() {
        let job = test_job();
        let mut work = build(&job, &session(), &[1], Some(5), U256::MAX, false);
        assert!(work.midstate_hex().is_none());
        work.midstate = Some(midstate(&header_171874()));
        assert_eq!(
            work.midstate_hex().unwrap(),
            "4a548fe471fa3a9a1371144556c3f64d2500b4826008fe4bbf7698c94eba7946"
        );
        assert_eq!(work.ntime, 5);
        assert_eq!(work.extranonce2, vec![0, 0, 0, 1]);
    }
}
