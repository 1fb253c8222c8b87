use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use pushpool::{Connection, PoolConfig, PooledConnection};
use std::time::{Duration, Instant};

// Total number of messages sent per benchmark iteration
const TOTAL_MESSAGES: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
#[error("unreachable")]
struct Unreachable;

/// Connection that only spins for a fixed number of iterations per send.
struct Spinner {
    spins: u32,
}

impl Connection for Spinner {
    type Message = u64;
    type Error = Unreachable;

    fn send_message(&mut self, message: u64) -> Result<(), Unreachable> {
        for _ in 0..self.spins {
            black_box(message);
        }
        Ok(())
    }

    fn copy(&self) -> Self {
        Self { spins: self.spins }
    }

    fn close(&mut self) -> Result<(), Unreachable> {
        Ok(())
    }

    fn test_connection(&mut self) -> Result<(), Unreachable> {
        Ok(())
    }

    fn set_cache_length(&mut self, _cache_length: usize) {}

    fn cache_length(&self) -> Result<usize, Unreachable> {
        Ok(0)
    }
}

/// Benchmark sending and draining with the specified pool capacities
fn bench_send_and_drain(c: &mut Criterion, group_name: &str, spins: u32) {
    let mut group = c.benchmark_group(group_name);

    for capacity in [1, 2, 4, 8, 16] {
        group.throughput(Throughput::Elements(TOTAL_MESSAGES as u64));
        group.bench_function(
            format!("elems/{}/capacity/{}", TOTAL_MESSAGES, capacity),
            |b| {
                b.iter_custom(|iters| {
                    let mut elapsed = Duration::ZERO;

                    for _ in 0..iters {
                        let config = PoolConfig::new(capacity)
                            .expect("capacity is non-zero")
                            .with_drain_timeout(Duration::from_secs(60));
                        let pool = PooledConnection::with_config(Spinner { spins }, config);

                        let start = Instant::now();
                        for message in 0..TOTAL_MESSAGES as u64 {
                            pool.send_message(black_box(message));
                        }
                        pool.close().expect("spinner never fails");
                        elapsed += start.elapsed();
                    }

                    elapsed
                });
            },
        );
    }

    group.finish();
}

fn benchmark_send_noop(c: &mut Criterion) {
    bench_send_and_drain(c, "send/noop", 0)
}

fn benchmark_send_busy(c: &mut Criterion) {
    bench_send_and_drain(c, "send/busy", 1_000)
}

criterion_group!(benches, benchmark_send_noop, benchmark_send_busy);
criterion_main!(benches);
