use v1::{
    server_to_client::Notify,
    utils::{HexBytes, HexU32Be, MerkleNode, PrevHash},
};

/// A pool job, immutable once received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub job_id: String,
    /// Previous block hash in header byte order.
    pub prev_hash: [u8; 32],
    pub coinbase1: Vec<u8>,
    pub coinbase2: Vec<u8>,
    pub merkle_branch: Vec<[u8; 32]>,
    pub version: u32,
    pub bits: u32,
    pub ntime: u32,
    pub clean: bool,
}

impl Job {
    /// Previous block hash as block explorers print it.
    pub fn prev_hash_display(&self) -> String {
        PrevHash(self.prev_hash).to_display_hex()
    }
}

impl From<Notify> for Job {
    fn from(n: Notify) -> Self {
        Job {
            job_id: n.job_id,
            prev_hash: n.prev_hash.0,
            coinbase1: n.coin_base1.0,
            coinbase2: n.coin_base2.0,
            merkle_branch: n.merkle_branch.into_iter().map(|m| m.0).collect(),
            version: n.version.0,
            bits: n.bits.0,
            ntime: n.time.0,
            clean: n.clean_jobs,
        }
    }
}

impl From<&Job> for Notify {
    fn from(job: &Job) -> Self {
        Notify {
            job_id: job.job_id.clone(),
            prev_hash: PrevHash(job.prev_hash),
            coin_base1: HexBytes(job.coinbase1.clone()),
            coin_base2: HexBytes(job.coinbase2.clone()),
            merkle_branch: job.merkle_branch.iter().copied().map(MerkleNode).collect(),
            version: HexU32Be(job.version),
            bits: HexU32Be(job.bits),
            time: HexU32Be(job.ntime),
            clean_jobs: job.clean,
        }
    }
}

/// Extranonce parameters of one pool subscription.
///
/// `extranonce1.len() + extranonce2_size` stays fixed for the life of the subscription, a new
/// subscription replaces the whole value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    pub extranonce1: Vec<u8>,
    pub extranonce2_size: usize,
}

impl SessionParams {
    pub fn new(extranonce1: Vec<u8>, extranonce2_size: usize) -> Self {
        Self {
            extranonce1,
            extranonce2_size,
        }
    }

    /// Width of the per-miner prefix carved out of extranonce2 for push miners.
    ///
    /// Tail value 0 belongs to getwork work units, so getwork and push miners never search the
    /// same coinbase space.
    pub fn tail_len(&self) -> usize {
        match self.extranonce2_size {
            0..=1 => 0,
            2..=4 => 1,
            _ => 2,
        }
    }

    /// Extranonce2 bytes left to a push miner after its tail.
    pub fn miner_extranonce2_size(&self) -> usize {
        self.extranonce2_size - self.tail_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_len_by_extranonce2_size() {
        assert_eq!(SessionParams::new(vec![0; 4], 1).tail_len(), 0);
        assert_eq!(SessionParams::new(vec![0; 4], 4).tail_len(), 1);
        assert_eq!(SessionParams::new(vec![0; 4], 8).tail_len(), 2);
        assert_eq!(SessionParams::new(vec![0; 4], 8).miner_extranonce2_size(), 6);
    }
}
