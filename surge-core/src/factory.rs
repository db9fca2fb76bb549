use common_types::Operation;
use rand::Rng;

/// Produces the next [`Operation`] for a job index under the configured
/// workload mix. Deterministic enough to reproduce the mix; not required to
/// be bit-reproducible across runs.
pub trait OperationFactory: Send + Sync {
    fn protocol(&self) -> &'static str;

    fn build(&self, job_id: u64) -> Operation;
}

/// Key for job `job_id`: random `r:<n>` under the configured key space, or
/// the monotonically increasing `i:<n>` when the key space is 0.
pub fn key_for(job_id: u64, random_keys: u64) -> String {
    if random_keys > 0 {
        format!("r:{}", rand::thread_rng().gen_range(0..random_keys))
    } else {
        format!("i:{job_id}")
    }
}

/// `data_size` bytes of the fixed fill pattern used for generated payloads.
pub fn fill_payload(data_size: usize) -> Vec<u8> {
    const PATTERN: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    PATTERN.iter().copied().cycle().take(data_size).collect()
}

/// The read/write split: `(job_id mod 100) < read_percent` selects a read.
pub fn is_read_job(job_id: u64, read_percent: u8) -> bool {
    (job_id % 100) < u64::from(read_percent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_keys_follow_the_job_index() {
        assert_eq!(key_for(0, 0), "i:0");
        assert_eq!(key_for(41, 0), "i:41");
    }

    #[test]
    fn random_keys_stay_inside_the_key_space() {
        for _ in 0..200 {
            let key = key_for(0, 10);
            let n: u64 = key.strip_prefix("r:").unwrap().parse().unwrap();
            assert!(n < 10);
        }
    }

    #[test]
    fn fill_payload_has_the_requested_size() {
        assert_eq!(fill_payload(0).len(), 0);
        assert_eq!(fill_payload(32).len(), 32);
        assert_eq!(fill_payload(100).len(), 100);
        // Deterministic: two payloads of the same size are identical.
        assert_eq!(fill_payload(64), fill_payload(64));
    }

    #[test]
    fn read_share_is_exact_over_a_century_of_jobs() {
        let reads = (0..100).filter(|job| is_read_job(*job, 70)).count();
        assert_eq!(reads, 70);
        assert_eq!((0..100).filter(|job| is_read_job(*job, 0)).count(), 0);
        assert_eq!((0..100).filter(|job| is_read_job(*job, 100)).count(), 100);
    }
}
