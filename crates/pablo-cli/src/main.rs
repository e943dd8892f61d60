//! `pablo` - command-line interface for the Pablo ISP pipeline engine.
//!
//! ```text
//! USAGE:
//!   pablo blocks                     List blocks and their DMA channels
//!   pablo tile --width W [--count N] Print the stripe plan of a frame
//!   pablo simulate [options]         Run RGBP shots on the simulated ISP
//!   pablo dump [options]             One simulated shot, then dump state
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pablo_chip::block::BlockId;
use pablo_chip::format::PixelFormat;
use pablo_driver::frame::RecordingNotifier;
use pablo_driver::interrupt::IrqLine;
use pablo_driver::params::OtfParam;
use pablo_driver::{
    DumpType, Frame, HardwareBlockDriver, InitFlags, IrqRegistry, IspConfig, NodeRequest, Param,
    Rect, Rgbp, RgbpBlock, SoftwareBackend, StripeTiler, VotfEndpoint, VotfLinkManager, VotfMode,
};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pablo", about = "Pablo camera ISP pipeline engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List hardware blocks and their DMA channel tables.
    Blocks,
    /// Print the stripe regions of a frame.
    Tile {
        /// Logical frame width in pixels.
        #[arg(long)]
        width: u32,
        /// Region count (0 or 1 disables tiling).
        #[arg(long, default_value_t = 2)]
        count: u32,
        /// Horizontal crop offset inside the source.
        #[arg(long, default_value_t = 0)]
        crop_x: u32,
    },
    /// Run RGBP shots on the simulated ISP and print each outcome.
    Simulate {
        #[command(flatten)]
        shot: ShotArgs,
        /// Number of frames.
        #[arg(long, default_value_t = 4)]
        frames: u32,
    },
    /// Run one simulated RGBP shot and dump parameters and registers.
    Dump {
        #[command(flatten)]
        shot: ShotArgs,
        /// Dump every register of the block window instead of the command payload.
        #[arg(long)]
        full: bool,
    },
}

#[derive(clap::Args)]
struct ShotArgs {
    /// Frame width.
    #[arg(long, default_value_t = 1920)]
    width: u32,
    /// Frame height.
    #[arg(long, default_value_t = 1080)]
    height: u32,
    /// Output width (defaults to the input width).
    #[arg(long)]
    out_width: Option<u32>,
    /// Output height (defaults to the input height).
    #[arg(long)]
    out_height: Option<u32>,
    /// Stripe regions per frame.
    #[arg(long, default_value_t = 1)]
    stripes: u32,
    /// Buffers per burst.
    #[arg(long, default_value_t = 1)]
    batch: u32,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Blocks => cmd_blocks(),
        Cmd::Tile { width, count, crop_x } => cmd_tile(width, count, crop_x)?,
        Cmd::Simulate { shot, frames } => cmd_simulate(&shot, frames)?,
        Cmd::Dump { shot, full } => cmd_dump(&shot, full)?,
    }

    Ok(())
}

fn cmd_blocks() {
    for block in BlockId::ALL {
        println!("{block}  ({} scalers)", block.scaler_count());
        for desc in block.rdma_channels().iter().chain(block.wdma_channels()) {
            println!(
                "     {:<12} {:?}{}  sbwc={}  formats={:?}",
                desc.name, desc.direction, desc.index, desc.sbwc, desc.formats
            );
        }
    }
}

fn cmd_tile(width: u32, count: u32, crop_x: u32) -> Result<()> {
    let config = IspConfig::from_env();
    let plan = StripeTiler::new(config.stripe).plan(width, count, crop_x)?;
    if plan.is_empty() {
        println!("{width} px: not tiled");
        return Ok(());
    }
    println!("{width} px in {} regions (crop_x {crop_x})", plan.len());
    for r in &plan {
        println!(
            "  [{}] core {:>5} +{:<5} margins {:>4}/{:<4} input {:>5} +{:<5} ratio {}",
            r.index,
            r.core_offset,
            r.core_width,
            r.left_margin,
            r.right_margin,
            r.input_start(),
            r.input_width(),
            r.pixel_ratio
        );
    }
    Ok(())
}

struct Sim {
    sim: Arc<SoftwareBackend>,
    registry: Arc<IrqRegistry>,
    events: Arc<RecordingNotifier>,
    block: RgbpBlock,
}

fn start(args: &ShotArgs) -> Result<Sim> {
    let sim = Arc::new(SoftwareBackend::new("pablo-sim"));
    let registry = Arc::new(IrqRegistry::new());
    let events = Arc::new(RecordingNotifier::default());
    let mut block = RgbpBlock::new(
        Rgbp,
        0,
        sim.clone(),
        Arc::new(IspConfig::from_env()),
        registry.clone(),
        events.clone(),
    );

    let input = Rect::new(0, 0, args.width, args.height);
    let output = Rect::new(
        0,
        0,
        args.out_width.unwrap_or(args.width),
        args.out_height.unwrap_or(args.height),
    );
    let otf = OtfParam {
        enable: true,
        size: input.size(),
        crop: input,
        ..OtfParam::default()
    };
    block.open(0)?;
    block.init(0, InitFlags::default())?;
    block.set_param(0, &[Param::OtfInput(otf), Param::InputCrop(input), Param::OutputCrop(output)])?;
    block.enable(0).context("enable RGBP")?;
    Ok(Sim { sim, registry, events, block })
}

fn frame(args: &ShotArgs, fcount: u32, batch_index: u32, stripe: u32) -> Frame {
    let out = Rect::new(
        0,
        0,
        args.out_width.unwrap_or(args.width),
        args.out_height.unwrap_or(args.height),
    );
    let addrs = (0..args.batch.max(1))
        .map(|i| 0x8000_0000 + u64::from(i) * 0x0100_0000)
        .collect();
    Frame::new(0, fcount)
        .with_node(NodeRequest::output(0, PixelFormat::Yuv420Sp8, out, addrs))
        .with_batch(args.batch, batch_index)
        .with_stripe(stripe, args.stripes)
}

impl Sim {
    fn complete_frame(&self) -> Result<()> {
        self.sim.raise_irq(
            BlockId::Rgbp,
            pablo_chip::regs::irq::FRAME_START | pablo_chip::regs::irq::FRAME_END,
            0,
        );
        self.registry.dispatch(BlockId::Rgbp, IrqLine::General, &*self.sim)?;
        Ok(())
    }
}

fn cmd_simulate(args: &ShotArgs, frames: u32) -> Result<()> {
    let mut s = start(args)?;
    let votf = Arc::new(Mutex::new(VotfLinkManager::new(s.sim.clone())));
    let link = votf
        .lock()
        .map_err(|_| anyhow::anyhow!("VOTF manager poisoned"))?
        .create_link(
            VotfEndpoint::new(BlockId::Rgbp, 0),
            VotfEndpoint::new(BlockId::Mcsc, 0),
            VotfMode::Streaming,
        )?;
    s.block.attach_votf(votf, link);
    let batch = args.batch.max(1);
    let stripes = args.stripes.max(1);

    println!("RGBP {}x{} on {}", args.width, args.height, s.sim.device());
    for fcount in 1..=frames {
        for batch_index in 0..batch {
            for stripe in 0..stripes {
                let f = frame(args, fcount, batch_index, stripe);
                match s.block.shot(&f) {
                    Ok(o) => println!(
                        "  frame {:>3} buf {batch_index} region {stripe}: {:>4} pairs  num_buffers={:#x}{}",
                        o.fcount,
                        o.pair_count,
                        o.num_buffers,
                        if o.skipped { "  (repeated)" } else { "" }
                    ),
                    Err(e) => println!("  frame {fcount:>3} buf {batch_index} region {stripe}: {e}"),
                }
                s.complete_frame()?;
            }
        }
    }

    println!();
    println!("Submissions : {}", s.sim.submissions().len());
    println!("Events      : {}", s.events.events().len());
    println!("IRQ         : {} start / {} end", s.block.irq().frame_start_count(), s.block.irq().frame_end_count());
    println!("Reg writes  : {}", s.sim.write_count());
    s.block.disable(0)?;
    s.block.close(0)?;
    Ok(())
}

fn cmd_dump(args: &ShotArgs, full: bool) -> Result<()> {
    let mut s = start(args)?;
    s.block.shot(&frame(args, 1, 0, 0))?;

    println!("{}", s.block.dump_params(0)?);
    let dump = if full { DumpType::Full } else { DumpType::Cmdq };
    for (offset, value) in s.block.dump_registers(dump)? {
        println!("  [{offset:#06x}] = {value:#010x}");
    }
    s.complete_frame()?;
    s.block.close(0)?;
    Ok(())
}
