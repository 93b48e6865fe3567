#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

use anyhow::{bail, Result};
use clap::Parser;
use log::info;

use nestgrid::common::Idx;
use nestgrid::kernel::Kernel;
use nestgrid::launch::LaunchLimits;
use nestgrid::nest::{lambda, perfect_nest};
use nestgrid::policy::LoopPolicy;
use nestgrid::pprint::{pprint, pprint_visits, PrintStyle};
use nestgrid::segment::RangeSegment;
use nestgrid::statement::LambdaTable;
use nestgrid::trace::VisitLog;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Iteration count of each loop, outermost first
    #[arg(required = true)]
    lens: Vec<Idx>,

    /// Policy of each loop, outermost first (seq, thread, block,
    /// block_seq:N, threadblock:N)
    #[arg(long, short)]
    policy: Vec<LoopPolicy>,

    #[arg(long, default_value_t = Idx::MAX)]
    max_blocks: Idx,

    #[arg(long, default_value_t = 1024)]
    max_threads: Idx,

    /// Blocks resident at once; logical blocks beyond this are strided over
    #[arg(long)]
    physical_blocks: Option<Idx>,

    /// Run on a single block of a single thread
    #[arg(long)]
    host: bool,

    /// Statement tree style
    #[arg(long, value_enum, default_value_t = PrintStyle::Full)]
    style: PrintStyle,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.policy.len() != args.lens.len() {
        bail!(
            "Got {} policies for {} loops",
            args.policy.len(),
            args.lens.len()
        );
    }

    let nest = [perfect_nest(&args.policy, lambda(0))];
    let segments = args.lens.iter().map(|&l| RangeSegment::new(0, l));
    let kernel = Kernel::new(&nest, segments)?;

    let mut limits = LaunchLimits::new(args.max_blocks, args.max_threads);
    if let Some(blocks) = args.physical_blocks {
        limits = limits.with_physical_blocks(blocks);
    }
    if args.host {
        limits = LaunchLimits::new(1, 1);
    }

    pprint(&kernel, &limits, args.style);
    println!();

    let plan = kernel.plan(&limits)?;
    println!(
        "Required {}; launching {} logical blocks on a {} grid",
        plan.required, plan.num_logical_blocks, plan.grid
    );
    println!();

    let log = VisitLog::new();
    let start_time = std::time::Instant::now();
    let stats = {
        let lambdas = LambdaTable::new().with(log.recorder());
        kernel.launch(&limits, &lambdas)?
    };
    info!("launch took {:?}", start_time.elapsed());
    info!("{} invocations", stats.invocations);

    pprint_visits(&log);
    Ok(())
}
