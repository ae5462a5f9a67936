use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use esp_collection::{
    Collection, FsIo, Game, PluginFlags, PluginId, Progress, ProgressCallback, Registry,
    SUPPORTED_EXTENSIONS,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "esp_collection")]
#[command(about = "按加载顺序载入 ESP/ESM 插件，查看统计、冲突和与主文件相同的记录")]
#[command(version = "0.1.0")]
struct Cli {
    /// 插件所在目录（游戏的 Data 目录）
    #[arg(short, long)]
    dir: PathBuf,

    /// 游戏类型（oblivion、fallout3、falloutnv、skyrim）
    #[arg(short, long, default_value = "skyrim")]
    game: String,

    /// 扩展冲突模式（conflicts 命令）
    #[arg(long)]
    extended: bool,

    /// 要执行的命令
    #[arg(value_enum)]
    command: Command,

    /// 插件文件名，按加载顺序排列
    #[arg(required = true)]
    plugins: Vec<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Command {
    /// 显示插件统计信息
    Stats,
    /// 列出被多个插件修改的记录及胜出者
    Conflicts,
    /// 列出与主文件版本完全相同的记录
    Itm,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    validate_plugins(&cli.plugins)?;
    let game = Game::from_name(&cli.game)?;

    let mut registry = Registry::new();
    let sink: Box<dyn Fn(&str) + Send> = Box::new(|message| eprintln!("{}", message));
    registry.set_log_sink(Some(sink));
    let id = registry.create_collection(game, Arc::new(FsIo::new(&cli.dir)), None)?;
    let collection = registry.collection_mut(id)?;

    let mut targets = Vec::with_capacity(cli.plugins.len());
    for name in &cli.plugins {
        // 前面插件的主文件可能已自动加入
        let existing = collection.plugins().into_iter().find(|&plugin| {
            collection.plugin_name(plugin).map_or(false, |added| added.eq_ignore_ascii_case(name))
        });
        let plugin = match existing {
            Some(plugin) => plugin,
            None => collection
                .add_plugin(name, PluginFlags::normal() - PluginFlags::SAVEABLE)
                .with_context(|| format!("无法加入插件 {}", name))?,
        };
        targets.push(plugin);
    }

    let mut report: Box<dyn FnMut(&Progress) -> bool> = Box::new(|progress| {
        eprintln!("[{}/{}] 载入 {}", progress.position + 1, progress.total, progress.name);
        true
    });
    let callback: ProgressCallback<'_> = report.as_mut();
    collection.load(Some(callback)).context("载入插件失败")?;

    match cli.command {
        Command::Stats => print_stats(collection, &targets),
        Command::Conflicts => print_conflicts(collection, &targets, cli.extended),
        Command::Itm => print_identical_to_master(collection, &targets),
    }
}

/// 验证插件扩展名
fn validate_plugins(plugins: &[String]) -> anyhow::Result<()> {
    for name in plugins {
        let extension = name.rsplit_once('.').map(|(_, ext)| ext.to_lowercase());
        if !SUPPORTED_EXTENSIONS.iter().any(|&ext| Some(ext) == extension.as_deref()) {
            bail!("插件必须是 ESP、ESM 或 ESL 文件: {}", name);
        }
    }
    Ok(())
}

fn print_stats(collection: &Collection, targets: &[PluginId]) -> anyhow::Result<()> {
    for plugin in collection.plugins() {
        let stats = collection.plugin(plugin)?.stats();
        let position = collection.load_order_position(plugin)?;
        match position {
            Some(index) => println!("[{:02X}] {}", index, stats.name),
            None => println!("[--] {}", stats.name),
        }
        if targets.contains(&plugin) {
            println!("{}", stats);
        }
    }
    Ok(())
}

fn print_conflicts(collection: &Collection, targets: &[PluginId], extended: bool) -> anyhow::Result<()> {
    for &plugin in targets {
        println!("=== {} ===", collection.plugin_name(plugin)?);
        let mut count = 0;
        for record in collection.records(plugin, None)? {
            let conflicts = collection.conflicts(record, extended)?;
            if conflicts.len() < 2 {
                continue;
            }
            count += 1;

            let current = collection.record(record)?;
            let winner = conflicts.last().map(|winner| winner.plugin());
            let winner_name = match winner {
                Some(winner) => collection.plugin_name(winner)?,
                None => "-",
            };
            println!(
                "{} {:08X} {:<32} {} 个版本，胜出: {}",
                current.record_type(),
                current.form_id().0,
                current.editor_id().unwrap_or(""),
                conflicts.len(),
                winner_name,
            );
        }
        println!("共 {} 条冲突记录", count);
    }
    Ok(())
}

fn print_identical_to_master(collection: &Collection, targets: &[PluginId]) -> anyhow::Result<()> {
    for &plugin in targets {
        let records = collection.identical_to_master(plugin)?;
        println!("=== {} : {} 条记录与主文件相同 ===", collection.plugin_name(plugin)?, records.len());
        for record in records {
            let current = collection.record(record)?;
            println!(
                "{} {:08X} {}",
                current.record_type(),
                current.form_id().0,
                current.editor_id().unwrap_or(""),
            );
        }
    }
    Ok(())
}
