use anyhow::Result;
use model_config::{Error, ModelSpec, ModuleKind};
use model_graph::{CompileOptions, Graph, NodeKey, Producer, Repeat};

/// Nine backbone layers, the last one upsampled back to stride 16.
fn model(head: &str) -> Result<ModelSpec> {
    ModelSpec::from_json5_str(&format!(
        r#"{{
            nc: 3,
            scales: {{
                m: [0.50, 0.75, 768],
                l: [1.00, 1.00, 512],
            }},
            backbone: [
                [-1, 1, "Conv", [64, 3, 2]],
                [-1, 1, "Conv", [128, 3, 2]],
                [-1, 4, "C2f", [128, true]],
                [-1, 1, "Conv", [256, 3, 2]],
                [-1, 4, "C2f", [256, true]],
                [-1, 1, "Conv", [512, 3, 2]],
                [-1, 4, "C2f", [512, true]],
                [-1, 1, "Conv", [512, 3, 2]],
                [-1, 1, "nn.Upsample", [null, 2, "nearest"]],
            ],
            head: [{}],
        }}"#,
        head
    ))
}

fn compile(spec: &ModelSpec, scale: &str) -> Result<Graph, Error> {
    Graph::compile(spec, &CompileOptions::with_scale(scale))
}

#[test]
fn fan_in_resolves_mixed_references() -> Result<()> {
    let spec = model(r#"[[-1, 6], 1, "Concat", [1]]"#)?;
    let graph = compile(&spec, "l")?;

    let node = &graph.nodes()[&NodeKey(9)];
    assert_eq!(
        node.producers,
        vec![Producer::Node(NodeKey(8)), Producer::Node(NodeKey(6))]
    );
    assert_eq!(node.input_channels, vec![512, 512]);
    assert_eq!(node.channels, 1024);

    // without a detection head the last node is the only tap
    assert_eq!(graph.tap_keys().collect::<Vec<_>>(), vec![NodeKey(9)]);
    assert_eq!(graph.head_key(), None);
    Ok(())
}

#[test]
fn repeats_follow_depth_multiple() -> Result<()> {
    let spec = model(r#"[[-1, 6], 1, "Concat", [1]]"#)?;

    let m = compile(&spec, "m")?;
    assert_eq!(m.nodes()[&NodeKey(2)].repeat, Repeat::Inline(2));
    assert_eq!(m.nodes()[&NodeKey(0)].repeat, Repeat::Chain(1));

    let l = compile(&spec, "l")?;
    assert_eq!(l.nodes()[&NodeKey(2)].repeat, Repeat::Inline(4));
    assert_eq!(l.nodes()[&NodeKey(2)].effective_repeats(), 4);
    Ok(())
}

#[test]
fn chained_repeats_compound_stride() -> Result<()> {
    let spec = model(r#"[-1, 2, "Conv", [64, 3, 2]]"#)?;
    let graph = Graph::compile(
        &spec,
        &CompileOptions {
            scale: Some("l".into()),
            image_size: Some([640, 640]),
        },
    )?;
    let node = &graph.nodes()[&NodeKey(9)];
    assert_eq!(node.repeat, Repeat::Chain(2));
    assert_eq!(node.stride.map(|stride| stride.raw()), Some(64.0));
    assert_eq!(node.output_shape.to_string(), "[_, 64, 10, 10]");
    Ok(())
}

#[test]
fn taps_follow_declared_order() -> Result<()> {
    let spec = model(r#"[[6, 4, 7], 1, "Detect", ["nc"]]"#)?;
    let graph = compile(&spec, "m")?;

    let taps: Vec<_> = graph
        .output_taps()
        .iter()
        .map(|(name, &key)| (name.to_string(), key))
        .collect();
    assert_eq!(
        taps,
        vec![
            ("P4".to_string(), NodeKey(6)),
            ("P3".to_string(), NodeKey(4)),
            ("P5".to_string(), NodeKey(7)),
        ]
    );
    let head = graph.head().unwrap();
    assert_eq!(head.kind, ModuleKind::Detect);
    assert_eq!(head.channels, 3 + 64);
    Ok(())
}

#[test]
fn forward_reference_fails() -> Result<()> {
    let spec = model(r#"[[-1, 12], 1, "Concat", [1]]"#)?;
    let err = compile(&spec, "l").unwrap_err();
    assert!(matches!(err, Error::ReferenceResolution { index: 9, .. }));

    let spec = model(r#"[[-1, 9], 1, "Concat", [1]]"#)?;
    let err = compile(&spec, "l").unwrap_err();
    assert!(matches!(err, Error::ReferenceResolution { index: 9, .. }));

    let spec = model(r#"[-11, 1, "Conv", [64]]"#)?;
    let err = compile(&spec, "l").unwrap_err();
    assert!(matches!(err, Error::ReferenceResolution { index: 9, .. }));
    Ok(())
}

#[test]
fn arity_and_shape_errors() -> Result<()> {
    let spec = model(r#"[[-1], 1, "Concat", [1]]"#)?;
    let err = compile(&spec, "l").unwrap_err();
    assert_eq!(err.layer_index(), Some(9));
    assert!(matches!(
        err,
        Error::ArityMismatch {
            index: 9,
            found: 1,
            ..
        }
    ));

    let spec = model(r#"[[-1, 0], 1, "Concat", [1]]"#)?;
    let err = compile(&spec, "l").unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { index: 9, .. }));

    let spec = model(r#"[-1, 1, "SimAM", [256]]"#)?;
    let err = compile(&spec, "l").unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { index: 9, .. }));
    Ok(())
}

#[test]
fn taps_are_validated() -> Result<()> {
    let spec = model(r#"[[4, 4], 1, "Detect", ["nc"]]"#)?;
    let err = compile(&spec, "l").unwrap_err();
    assert!(matches!(err, Error::MalformedSpec { index: Some(9), .. }));

    let spec = model(r#"[[4], 1, "Detect", ["nc"]], [[6], 1, "Detect", ["nc"]]"#)?;
    let err = compile(&spec, "l").unwrap_err();
    assert!(matches!(err, Error::MalformedSpec { index: Some(10), .. }));

    let spec = ModelSpec::from_json5_str(
        r#"{ nc: 1, backbone: [[-1, 1, "Detect", ["nc"]]], head: [] }"#,
    )?;
    let err = Graph::compile(&spec, &CompileOptions::default()).unwrap_err();
    assert!(matches!(err, Error::ReferenceResolution { index: 0, .. }));
    Ok(())
}

#[test]
fn oversized_channels_are_rejected() -> Result<()> {
    let spec = ModelSpec::from_json5_str(
        r#"{
            nc: 1,
            width_multiple: 3.0,
            backbone: [[-1, 1, "Conv", [9223372036854775807]]],
            head: [],
        }"#,
    )?;
    let err = Graph::compile(&spec, &CompileOptions::default()).unwrap_err();
    assert!(matches!(err, Error::MalformedSpec { index: Some(0), .. }));
    Ok(())
}

#[test]
fn summary_counts() -> Result<()> {
    let spec = model(r#"[[-1, 6], 1, "Concat", [1]]"#)?;
    let summary = compile(&spec, "l")?.summary();
    assert_eq!(summary.num_nodes, 10);
    assert_eq!(summary.num_fan_in, 1);
    assert_eq!(summary.num_taps, 1);
    // node 6 stays alive until the concatenation
    assert_eq!(summary.max_live, 3);
    Ok(())
}
