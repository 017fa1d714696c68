use anyhow::Result;
use model_config::ModelSpec;
use model_graph::{CompileOptions, Graph, NodeKey, TapName};

const SCALES: &[&str] = &["n", "s", "m", "l", "x"];

fn model_files() -> Result<Vec<std::path::PathBuf>> {
    let pattern = format!(
        "{}/../model-config/cfg/model/*.json5",
        env!("CARGO_MANIFEST_DIR")
    );
    let files: Vec<_> = glob::glob(&pattern)?.collect::<Result<_, _>>()?;
    Ok(files)
}

#[test]
fn model_config_test() -> Result<()> {
    let files = model_files()?;
    assert!(!files.is_empty());

    for file in files {
        let spec = ModelSpec::load(&file)?;

        for &scale in SCALES {
            let options = CompileOptions {
                scale: Some(scale.into()),
                image_size: Some([640, 640]),
            };
            let graph = Graph::compile(&spec, &options)?;
            graph.verify()?;

            let names: Vec<_> = graph.output_taps().keys().cloned().collect();
            let expected: Vec<TapName> = vec!["P3".into(), "P4".into(), "P5".into()];
            assert_eq!(names, expected, "{} at scale {}", file.display(), scale);

            let params = *graph.scale();
            graph.nodes().values().for_each(|node| {
                assert!(node.effective_repeats() >= 1);
                if node.kind.descriptor().channel_arg_index().is_some() {
                    assert_eq!(node.channels % 8, 0);
                    assert!(node.channels <= params.max_channels);
                }
                node.producers
                    .iter()
                    .filter_map(|producer| producer.node())
                    .for_each(|src| assert!(src < node.key));
            });

            let head = graph.head().unwrap();
            assert_eq!(head.output_shape.as_ref()[2].size(), Some(8400));
        }
    }

    Ok(())
}

#[test]
fn compile_is_deterministic() -> Result<()> {
    for file in model_files()? {
        let spec = ModelSpec::load(&file)?;
        let options = CompileOptions::with_scale("m");
        let lhs = serde_json::to_string(&Graph::compile(&spec, &options)?)?;
        let rhs = serde_json::to_string(&Graph::compile(&spec, &options)?)?;
        assert_eq!(lhs, rhs);
    }
    Ok(())
}

#[test]
fn yolov8_taps() -> Result<()> {
    let path = format!(
        "{}/../model-config/cfg/model/yolov8.json5",
        env!("CARGO_MANIFEST_DIR")
    );
    let spec = ModelSpec::load(path)?;
    let graph = Graph::compile(&spec, &CompileOptions::with_scale("n"))?;

    let taps: Vec<_> = graph.tap_keys().collect();
    assert_eq!(taps, vec![NodeKey(15), NodeKey(18), NodeKey(21)]);
    assert_eq!(graph.head_key(), Some(NodeKey(22)));

    let channels: Vec<_> = taps
        .iter()
        .map(|key| graph.nodes()[key].channels)
        .collect();
    assert_eq!(channels, vec![64, 128, 256]);
    assert_eq!(graph.head().unwrap().channels, 80 + 64);
    Ok(())
}
