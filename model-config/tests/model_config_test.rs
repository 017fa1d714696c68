use anyhow::Result;
use model_config::{parse_layers, registry, ModelSpec, ModuleKind, Section};
use std::path::{Path, PathBuf};

lazy_static::lazy_static! {
    static ref CONFIG_DIR: PathBuf = Path::new(env!("CARGO_MANIFEST_DIR")).join("cfg").join("model");
    static ref MODEL_FILES: Vec<PathBuf> = {
        let pattern = CONFIG_DIR.join("*.json5");
        glob::glob(pattern.to_str().unwrap())
            .unwrap()
            .map(|path| path.unwrap())
            .collect()
    };
}

#[test]
fn parse_model_files() -> Result<()> {
    assert!(!MODEL_FILES.is_empty());

    MODEL_FILES.iter().try_for_each(|path| -> Result<_> {
        let spec = ModelSpec::load(path)?;
        let layers = parse_layers(&spec)?;
        assert_eq!(layers.len(), spec.num_layers());

        layers.iter().enumerate().for_each(|(index, layer)| {
            assert_eq!(layer.index, index);
            let expected = if index < spec.backbone.len() {
                Section::Backbone
            } else {
                Section::Head
            };
            assert_eq!(layer.section, expected);
            assert!(registry::lookup(layer.kind.as_ref()).is_ok());
        });

        let detect: Vec<_> = layers
            .iter()
            .filter(|layer| layer.kind == ModuleKind::Detect)
            .collect();
        assert_eq!(detect.len(), 1);
        assert_eq!(detect[0].sources.len(), 3);

        ["n", "s", "m", "l", "x"].iter().try_for_each(|key| -> Result<_> {
            spec.select_scale(Some(key))?;
            Ok(())
        })?;
        Ok(())
    })?;
    Ok(())
}

#[test]
fn default_scale_field() -> Result<()> {
    let spec = ModelSpec::load(CONFIG_DIR.join("yolov8-lcbham.json5"))?;
    let selection = spec.select_scale(None)?;
    assert_eq!(selection.key.as_deref(), Some("s"));
    Ok(())
}
