use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use kurbo::Size;
use serde::Serialize;
use tessera::{
    BeginFrameArgs, HeadlessOutputSurface, HostLayer, LayerTreeHost, LayerTreeHostClient,
    LayerTreeSettings, OutputSurface, RasterTilePriorityQueue, Scene, SceneFile,
    SingleThreadClient, SingleThreadProxy, TileSpec, TreePriority, WhichTree,
};

#[derive(Parser, Debug)]
#[command(name = "tessera", version)]
struct Cli {
    /// Most verbose log level written to stderr.
    #[arg(long, value_enum, global = true, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the global raster order of a two-tree scene.
    Order(OrderArgs),
    /// Drive a single-threaded compositor through a number of frames.
    Simulate(SimulateArgs),
}

#[derive(Parser, Debug)]
struct OrderArgs {
    /// Scene JSON.
    #[arg(long)]
    scene: PathBuf,

    /// Overrides the mode stored in the scene.
    #[arg(long, value_enum)]
    tree_priority: Option<TreePriorityChoice>,

    /// Stop after this many tiles.
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Parser, Debug)]
struct SimulateArgs {
    /// Scene JSON; each layer's tiles become one host layer.
    #[arg(long)]
    scene: PathBuf,

    /// Number of frames to produce.
    #[arg(long, default_value_t = 3)]
    frames: u32,

    /// Layer tree settings JSON.
    #[arg(long)]
    settings: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TreePriorityChoice {
    Same,
    Smoothness,
    NewContent,
}

impl From<TreePriorityChoice> for TreePriority {
    fn from(choice: TreePriorityChoice) -> Self {
        match choice {
            TreePriorityChoice::Same => TreePriority::SamePriorityForBothTrees,
            TreePriorityChoice::Smoothness => TreePriority::SmoothnessTakesPriority,
            TreePriorityChoice::NewContent => TreePriority::NewContentTakesPriority,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::from(cli.log_level))
        .with_writer(std::io::stderr)
        .init();

    match cli.cmd {
        Command::Order(args) => cmd_order(args),
        Command::Simulate(args) => cmd_simulate(args),
    }
}

#[derive(Serialize)]
struct OrderLine {
    rank: usize,
    tile: u64,
    layer: u32,
    shared: bool,
    active: Option<tessera::TilePriority>,
    pending: Option<tessera::TilePriority>,
}

fn cmd_order(args: OrderArgs) -> anyhow::Result<()> {
    let scene = Scene::from_path(&args.scene)
        .with_context(|| format!("load scene '{}'", args.scene.display()))?;
    let tree_priority = args
        .tree_priority
        .map(TreePriority::from)
        .or(scene.tree_priority)
        .unwrap_or_default();

    let pairs = scene.layer_pairs();
    let mut queue = RasterTilePriorityQueue::new();
    queue.build(&pairs, tree_priority);

    let limit = args.limit.unwrap_or(usize::MAX);
    let mut printed = 0;
    for (rank, tile) in queue.take(limit).enumerate() {
        let on_tree = |tree: WhichTree| {
            let tree_impl = match tree {
                WhichTree::Active => Some(&scene.active),
                WhichTree::Pending => scene.pending.as_ref(),
            };
            tree_impl
                .and_then(|t| t.layer(tile.layer()))
                .is_some_and(|l| l.tiles().iter().any(|t| t.id() == tile.id()))
                .then(|| tile.priority(tree))
        };
        let line = OrderLine {
            rank,
            tile: tile.id().0,
            layer: tile.layer().0,
            shared: tile.is_shared(),
            active: on_tree(WhichTree::Active),
            pending: on_tree(WhichTree::Pending),
        };
        println!("{}", serde_json::to_string(&line)?);
        printed += 1;
    }
    eprintln!("{printed} tiles ({tree_priority:?})");
    Ok(())
}

type EventLog = Rc<RefCell<Vec<&'static str>>>;

struct SimHostClient {
    events: EventLog,
}

impl LayerTreeHostClient for SimHostClient {
    fn did_commit(&mut self) {
        self.events.borrow_mut().push("commit");
    }

    fn did_commit_and_draw_frame(&mut self) {
        self.events.borrow_mut().push("commit_and_draw");
    }

    fn did_complete_swap_buffers(&mut self) {
        self.events.borrow_mut().push("swap_complete");
    }

    fn did_receive_animation_events(&mut self, _events: &[tessera::AnimationEvent]) {
        self.events.borrow_mut().push("animation_started");
    }

    fn request_new_output_surface(&mut self) -> Option<Box<dyn OutputSurface>> {
        self.events.borrow_mut().push("output_surface");
        Some(Box::new(HeadlessOutputSurface::new()))
    }
}

struct SimProxyClient {
    events: EventLog,
    swapped: Rc<Cell<bool>>,
}

impl SingleThreadClient for SimProxyClient {
    fn did_post_swap_buffers(&mut self) {
        self.events.borrow_mut().push("swap");
        self.swapped.set(true);
    }

    fn did_abort_swap_buffers(&mut self) {
        self.events.borrow_mut().push("swap_aborted");
    }
}

#[derive(Serialize)]
struct FrameLine {
    frame: u32,
    actions: usize,
    source_frame_number: u64,
    compositor_frame_number: u64,
    events: Vec<&'static str>,
}

fn host_layers(file: &SceneFile) -> Vec<HostLayer> {
    file.layers
        .iter()
        .map(|layer| {
            let tiles = layer
                .tiles
                .iter()
                .enumerate()
                .filter_map(|(i, tile)| {
                    let priority = tile.pending.or(tile.active)?;
                    Some(TileSpec::new(i as i32, 0, priority))
                })
                .collect();
            HostLayer::new(layer.id, tiles).with_traversal(layer.traversal)
        })
        .collect()
}

fn cmd_simulate(args: SimulateArgs) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&args.scene)
        .with_context(|| format!("read scene '{}'", args.scene.display()))?;
    let file: SceneFile = serde_json::from_str(&text)
        .with_context(|| format!("parse scene '{}'", args.scene.display()))?;
    file.validate()?;

    let settings = match &args.settings {
        Some(path) => LayerTreeSettings::from_path(path)
            .with_context(|| format!("load settings '{}'", path.display()))?,
        None => LayerTreeSettings::default(),
    };

    let events: EventLog = Rc::default();
    let swapped = Rc::new(Cell::new(false));
    let mut host = LayerTreeHost::new(
        settings,
        Box::new(SimHostClient {
            events: Rc::clone(&events),
        }),
    );
    host.set_viewport_size(Size::new(1024.0, 768.0));
    for layer in host_layers(&file) {
        host.set_layer(layer);
    }

    let mut proxy = SingleThreadProxy::new(
        host,
        Box::new(SimProxyClient {
            events: Rc::clone(&events),
            swapped: Rc::clone(&swapped),
        }),
    );
    proxy.start();
    proxy.set_layer_tree_host_client_ready();
    proxy.set_visible(true);

    let interval = BeginFrameArgs::default().interval;
    for frame in 0..args.frames {
        let frame_time = interval * frame;
        if proxy.has_scheduler() {
            proxy.will_begin_impl_frame(BeginFrameArgs::new(frame_time));
            proxy.set_needs_commit();
            let actions = proxy.run_until_idle();
            proxy.did_begin_impl_frame_deadline();
            if swapped.replace(false) {
                proxy.did_swap_buffers_complete_on_impl_thread();
            }
            print_frame(&proxy, frame, actions, &events)?;
        } else {
            proxy.composite_immediately(frame_time);
            print_frame(&proxy, frame, 0, &events)?;
        }
    }

    proxy.stop();
    Ok(())
}

fn print_frame(
    proxy: &SingleThreadProxy,
    frame: u32,
    actions: usize,
    events: &EventLog,
) -> anyhow::Result<()> {
    let line = FrameLine {
        frame,
        actions,
        source_frame_number: proxy.host().source_frame_number().0,
        compositor_frame_number: proxy.host_impl().map_or(0, |h| h.frame_number().0),
        events: std::mem::take(&mut *events.borrow_mut()),
    };
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}
