use common_types::{BenchmarkConfig, Operation};
use surge_core::factory::{fill_payload, is_read_job, key_for, OperationFactory};

use crate::config::RedisConfig;

/// Builds the Redis workload mix: `read_percent` decides read vs. write per
/// job, `test_case` selects the data structure family.
pub struct RedisOperationFactory {
    config: RedisConfig,
    bench: BenchmarkConfig,
}

impl RedisOperationFactory {
    pub fn new(config: RedisConfig, bench: BenchmarkConfig) -> Self {
        Self { config, bench }
    }

    fn verbs_for(&self, job_id: u64) -> (&'static str, &'static str) {
        // (read verb, write verb) per family.
        match self.bench.test_case.as_str() {
            "list" => ("llen", if job_id % 2 == 0 { "lpush" } else { "rpush" }),
            "set" => ("sismember", "sadd"),
            "zset" => ("zrange", "zadd"),
            "hash" => ("hget", "hset"),
            "incr" => ("get", if job_id % 2 == 0 { "incr" } else { "decr" }),
            "pubsub" => ("subscribe", "publish"),
            "mixed" => match job_id % 5 {
                0 => ("get", "set"),
                1 => ("llen", "lpush"),
                2 => ("sismember", "sadd"),
                3 => ("zrange", "zadd"),
                _ => ("hget", "hset"),
            },
            // `string` and anything unrecognized drive the plain get/set mix.
            _ => ("get", "set"),
        }
    }
}

impl OperationFactory for RedisOperationFactory {
    fn protocol(&self) -> &'static str {
        "redis"
    }

    fn build(&self, job_id: u64) -> Operation {
        let is_read = is_read_job(job_id, self.bench.read_percent);
        let (read_verb, write_verb) = self.verbs_for(job_id);
        let verb = if is_read { read_verb } else { write_verb };
        let key = key_for(job_id, self.bench.random_keys);

        let mut op = Operation::new(verb, key)
            .with_param("member", format!("m:{job_id}"))
            .with_param("field", format!("f:{}", job_id % 16))
            .with_param("score", job_id as f64)
            .with_op_kind(is_read);
        if !is_read {
            op = op.with_value(fill_payload(self.bench.data_size));
            if let Some(ttl) = self.config.ttl {
                op = op.with_ttl(ttl);
            }
        }
        op
    }
}
