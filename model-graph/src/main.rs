use anyhow::Result;
use model_config::ModelSpec;
use model_graph::{CompileOptions, Graph};
use prettytable::{cell, row, Table};
use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};
use structopt::StructOpt;

#[derive(Debug, Clone, StructOpt)]
struct CompileArgs {
    /// configuration file
    config_file: PathBuf,
    /// model scale key, e.g. n, s, m, l or x
    #[structopt(long)]
    scale: Option<String>,
    /// input image size as HEIGHT,WIDTH
    #[structopt(long, use_delimiter = true, number_of_values = 2)]
    image_size: Option<Vec<usize>>,
}

#[derive(Debug, Clone, StructOpt)]
enum Args {
    /// print nodes and output taps of a model
    Info {
        #[structopt(flatten)]
        compile: CompileArgs,
    },
    /// render a model into a graphviz DOT file
    MakeDotFile {
        #[structopt(flatten)]
        compile: CompileArgs,
        /// output DOT file
        output_file: PathBuf,
    },
}

fn main() -> Result<()> {
    pretty_env_logger::init();

    match Args::from_args() {
        Args::Info { compile } => {
            info(&compile)?;
        }
        Args::MakeDotFile {
            compile,
            output_file,
        } => {
            make_dot_file(&compile, output_file)?;
        }
    }

    Ok(())
}

fn compile(args: &CompileArgs) -> Result<Graph> {
    let spec = ModelSpec::load(&args.config_file)?;
    let image_size = match args.image_size.as_deref() {
        Some(&[h, w]) => Some([h, w]),
        Some(size) => anyhow::bail!("expect HEIGHT,WIDTH image size, but get {:?}", size),
        None => None,
    };
    let options = CompileOptions {
        scale: args.scale.clone(),
        image_size,
    };
    let graph = Graph::compile(&spec, &options)?;
    graph.verify()?;
    Ok(graph)
}

fn info(args: &CompileArgs) -> Result<()> {
    let graph = compile(args)?;

    // print node information
    {
        let mut table = Table::new();
        table.add_row(row![
            "key", "section", "module", "from", "repeat", "channels", "stride", "output shape"
        ]);

        graph.nodes().iter().for_each(|(&key, node)| {
            let from = node
                .producers
                .iter()
                .map(|producer| producer.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            table.add_row(row![
                key,
                node.section,
                node.kind,
                from,
                node.repeat,
                node.channels,
                node.stride
                    .map(|stride| stride.to_string())
                    .unwrap_or_else(|| "-".into()),
                node.output_shape,
            ]);
        });

        table.printstd();
    }

    // print output taps
    {
        let mut table = Table::new();
        table.add_row(row!["tap", "node", "output shape"]);

        graph.output_taps().iter().for_each(|(name, key)| {
            table.add_row(row![name, key, graph.nodes()[key].output_shape]);
        });

        table.printstd();
    }

    println!(
        "scale: {} ({})",
        graph.scale_key().as_deref().unwrap_or("-"),
        graph.scale()
    );
    println!("{}", graph.summary());

    Ok(())
}

#[cfg(feature = "dot")]
fn make_dot_file(args: &CompileArgs, output_file: impl AsRef<Path>) -> Result<()> {
    let graph = compile(args)?;
    let mut writer = BufWriter::new(File::create(output_file)?);
    graph.render_dot(&mut writer)?;
    Ok(())
}

#[cfg(not(feature = "dot"))]
fn make_dot_file(_args: &CompileArgs, _output_file: impl AsRef<Path>) -> Result<()> {
    use anyhow::bail;
    bail!("'dot' feature must be enabled to run this command");
}
