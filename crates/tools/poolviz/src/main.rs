//! Pool occupancy visualization and latency benchmarks
//!
//! External collaborator of the `mempool` library: drives the pools purely
//! through their public API, renders ASCII occupancy maps and compares
//! allocation latency against the system allocator.

#![allow(clippy::print_stdout)] // This is a CLI tool that needs to print output
#![allow(clippy::cast_precision_loss)] // Acceptable for benchmarking calculations

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hdrhistogram::Histogram;
use mempool::{FixedBlockPool, LockFreeFixedPool, StackAllocator};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "poolviz", about = "mempool occupancy maps & latency benchmarks")]
struct Cli {
    #[arg(long, default_value = "info")]
    log: String,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Render the occupancy map of a fixed-block pool and a stack allocator
    /// after a scripted allocate/free sequence
    Layout {
        #[arg(long, default_value_t = 32)]
        block_size: usize,
        #[arg(long, default_value_t = 40)]
        blocks: usize,
        /// how many blocks to allocate before rendering
        #[arg(long, default_value_t = 28)]
        fill: usize,
        /// free every Nth allocated block to fragment the map
        #[arg(long, default_value_t = 3)]
        free_stride: usize,
        #[arg(long, default_value_t = 1024)]
        stack_capacity: usize,
    },
    /// Measure allocate/deallocate latency of the pools against the system
    /// allocator
    Bench {
        #[arg(long, default_value_t = 64)]
        block_size: usize,
        #[arg(long, default_value_t = 100_000)]
        iterations: usize,
        /// free in a shuffled order instead of allocation order
        #[arg(long, default_value_t = false)]
        random_free: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(cli.log))
        .with_target(false)
        .compact()
        .init();

    match cli.cmd {
        Cmd::Layout {
            block_size,
            blocks,
            fill,
            free_stride,
            stack_capacity,
        } => cmd_layout(block_size, blocks, fill, free_stride, stack_capacity),
        Cmd::Bench {
            block_size,
            iterations,
            random_free,
        } => cmd_bench(block_size, iterations, random_free),
    }
}

fn cmd_layout(
    block_size: usize,
    blocks: usize,
    fill: usize,
    free_stride: usize,
    stack_capacity: usize,
) -> Result<()> {
    let mut pool = FixedBlockPool::new(block_size, blocks).context("create fixed-block pool")?;

    let mut held = Vec::with_capacity(fill);
    for _ in 0..fill.min(blocks) {
        match pool.allocate() {
            Some(ptr) => held.push(ptr),
            None => break,
        }
    }
    if free_stride > 0 {
        let mut index = 0;
        held.retain(|ptr| {
            index += 1;
            if index % free_stride == 0 {
                pool.deallocate(*ptr);
                false
            } else {
                true
            }
        });
    }

    println!("fixed-block pool: {} blocks x {} bytes", pool.capacity(), pool.block_size());
    print_block_map(&pool.free_map());
    println!(
        "{} used / {} free   ■ = allocated  □ = free",
        pool.used_blocks(),
        pool.free_blocks()
    );
    println!("stats: {}", pool.stats().snapshot());

    // Stack allocator fill bar after a few mixed-alignment allocations.
    let mut stack = StackAllocator::new(stack_capacity).context("create stack allocator")?;
    let _ = stack.allocate(stack_capacity / 10);
    let _ = stack.allocate_aligned(stack_capacity / 4, 64);
    println!();
    println!("stack allocator: {} bytes", stack.capacity());
    print_fill_bar(stack.fill_ratio());
    println!("used {} / {} bytes", stack.used(), stack.capacity());

    // Leave the pools clean so teardown logs no leak warning.
    for ptr in held {
        pool.deallocate(ptr);
    }
    stack.clear();
    Ok(())
}

/// ■/□ per block, ten blocks per row.
fn print_block_map(free_map: &[bool]) {
    for (i, free) in free_map.iter().enumerate() {
        if i % 10 == 0 {
            if i > 0 {
                println!();
            }
            print!("{i:4}: ");
        }
        print!("{} ", if *free { '□' } else { '■' });
    }
    println!();
}

/// `[#####     ] 50%` style bar, 50 columns wide.
fn print_fill_bar(ratio: f64) {
    const WIDTH: usize = 50;
    let used = (ratio * WIDTH as f64).round() as usize;
    let bar: String = (0..WIDTH).map(|i| if i < used { '#' } else { ' ' }).collect();
    println!("[{bar}] {:.1}%", ratio * 100.0);
}

struct BenchReport {
    name: &'static str,
    alloc: Histogram<u64>,
    free: Histogram<u64>,
    elapsed_us: f64,
}

impl BenchReport {
    fn print(&self, iterations: usize) {
        let ops_per_sec = (iterations as f64 * 2.0) / (self.elapsed_us / 1_000_000.0);
        println!(
            "{:<18} alloc p50 {:>5} ns  p99 {:>6} ns  max {:>7} ns | free p50 {:>5} ns  p99 {:>6} ns | {:.0} ops/s",
            self.name,
            self.alloc.value_at_quantile(0.50),
            self.alloc.value_at_quantile(0.99),
            self.alloc.max(),
            self.free.value_at_quantile(0.50),
            self.free.value_at_quantile(0.99),
            ops_per_sec,
        );
    }
}

fn cmd_bench(block_size: usize, iterations: usize, random_free: bool) -> Result<()> {
    info!(block_size, iterations, random_free, "running latency comparison");

    let system = bench_system(block_size, iterations, random_free)?;
    let fixed = bench_fixed(block_size, iterations, random_free)?;
    let lock_free = bench_lock_free(block_size, iterations, random_free)?;

    println!("latency over {iterations} allocate/free pairs ({block_size}-byte objects):");
    system.print(iterations);
    fixed.print(iterations);
    lock_free.print(iterations);

    let speedup = system.elapsed_us / fixed.elapsed_us;
    println!("fixed pool vs system: {speedup:.2}x");
    Ok(())
}

fn free_order(iterations: usize, random_free: bool) -> Vec<usize> {
    let mut order: Vec<usize> = (0..iterations).collect();
    if random_free {
        let mut rng = StdRng::seed_from_u64(42);
        order.shuffle(&mut rng);
    }
    order
}

fn bench_system(block_size: usize, iterations: usize, random_free: bool) -> Result<BenchReport> {
    let mut alloc_hist = Histogram::<u64>::new(3)?;
    let mut free_hist = Histogram::<u64>::new(3)?;
    let order = free_order(iterations, random_free);

    let t0 = Instant::now();
    let mut held: Vec<Option<Box<[u8]>>> = Vec::with_capacity(iterations);
    for _ in 0..iterations {
        let t = Instant::now();
        let block = vec![0u8; block_size].into_boxed_slice();
        alloc_hist.record(t.elapsed().as_nanos() as u64)?;
        held.push(Some(block));
    }
    for &i in &order {
        let t = Instant::now();
        held[i] = None;
        free_hist.record(t.elapsed().as_nanos() as u64)?;
    }
    let elapsed_us = t0.elapsed().as_secs_f64() * 1_000_000.0;

    Ok(BenchReport {
        name: "system",
        alloc: alloc_hist,
        free: free_hist,
        elapsed_us,
    })
}

fn bench_fixed(block_size: usize, iterations: usize, random_free: bool) -> Result<BenchReport> {
    let mut pool = FixedBlockPool::new(block_size, iterations).context("create bench pool")?;
    let mut alloc_hist = Histogram::<u64>::new(3)?;
    let mut free_hist = Histogram::<u64>::new(3)?;
    let order = free_order(iterations, random_free);

    let t0 = Instant::now();
    let mut held = Vec::with_capacity(iterations);
    for _ in 0..iterations {
        let t = Instant::now();
        let ptr = pool.allocate().context("bench pool sized to iterations")?;
        alloc_hist.record(t.elapsed().as_nanos() as u64)?;
        held.push(ptr);
    }
    for &i in &order {
        let t = Instant::now();
        pool.deallocate(held[i]);
        free_hist.record(t.elapsed().as_nanos() as u64)?;
    }
    let elapsed_us = t0.elapsed().as_secs_f64() * 1_000_000.0;

    Ok(BenchReport {
        name: "fixed pool",
        alloc: alloc_hist,
        free: free_hist,
        elapsed_us,
    })
}

fn bench_lock_free(block_size: usize, iterations: usize, random_free: bool) -> Result<BenchReport> {
    let pool = LockFreeFixedPool::new(block_size, iterations).context("create bench pool")?;
    let mut alloc_hist = Histogram::<u64>::new(3)?;
    let mut free_hist = Histogram::<u64>::new(3)?;
    let order = free_order(iterations, random_free);

    let t0 = Instant::now();
    let mut held = Vec::with_capacity(iterations);
    for _ in 0..iterations {
        let t = Instant::now();
        let ptr = pool.allocate().context("bench pool sized to iterations")?;
        alloc_hist.record(t.elapsed().as_nanos() as u64)?;
        held.push(ptr);
    }
    for &i in &order {
        let t = Instant::now();
        pool.deallocate(held[i]);
        free_hist.record(t.elapsed().as_nanos() as u64)?;
    }
    let elapsed_us = t0.elapsed().as_secs_f64() * 1_000_000.0;

    Ok(BenchReport {
        name: "lock-free pool",
        alloc: alloc_hist,
        free: free_hist,
        elapsed_us,
    })
}
