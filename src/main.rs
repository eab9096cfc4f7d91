use clap::Parser;
use log::error;

use facescan::Opts;
use facescan::cli::SubCommandExtend;
use facescan::config::SubCommand;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = Opts::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("无法创建 tokio 运行时: {}", e);
            std::process::exit(1);
        }
    };

    let (result, shutdown_wait) = match &opts.subcmd {
        SubCommand::Run(config) => {
            (runtime.block_on(config.run(&opts)), config.pipeline.runtime_shutdown_wait)
        }
    };

    // 超时任务的处理线程可能仍在运行，不能无限等待它们
    runtime.shutdown_timeout(shutdown_wait);

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
