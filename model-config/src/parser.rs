use crate::{
    arg::Arg,
    common::*,
    error::Error,
    layer::{LayerRecord, LayerSpec, Section},
    registry,
    source_ref::SourceRef,
    spec::ModelSpec,
};

/// Turns the backbone and head records into layer specs in declaration order.
///
/// Head indices continue after the backbone. The first record that
/// contradicts its module descriptor fails the whole parse.
pub fn parse_layers(spec: &ModelSpec) -> Result<Vec<LayerSpec>, Error> {
    let symbols: HashMap<&str, Arg> = iter::once(("nc", Arg::Int(spec.nc as i64))).collect();

    let records = spec
        .backbone
        .iter()
        .map(|record| (Section::Backbone, record))
        .chain(spec.head.iter().map(|record| (Section::Head, record)));

    records
        .enumerate()
        .map(|(index, (section, record))| {
            parse_record(index, section, record, &symbols).map_err(|err| err.at(index))
        })
        .collect()
}

fn parse_record(
    index: usize,
    section: Section,
    record: &LayerRecord,
    symbols: &HashMap<&str, Arg>,
) -> Result<LayerSpec, Error> {
    let LayerRecord {
        from,
        repeats,
        module,
        args,
    } = record;

    let descriptor = registry::lookup(module)?;

    if *repeats == 0 {
        return Err(Error::malformed_at(index, "the repeat count must be positive"));
    }
    if *repeats > 1 && !descriptor.supports_repeat && descriptor.arity.is_fan_in() {
        return Err(Error::malformed_at(
            index,
            format!(
                "{} cannot be repeated, but the repeat count is {}",
                descriptor.name, repeats
            ),
        ));
    }

    match from {
        SourceRef::List(list) if list.is_empty() => {
            return Err(Error::malformed_at(index, "the source list is empty"));
        }
        SourceRef::List(list) if list.iter().any(SourceRef::is_list) => {
            return Err(Error::malformed_at(
                index,
                format!("nested source list {} is not allowed", from),
            ));
        }
        SourceRef::Relative(_) | SourceRef::Absolute(_) if descriptor.min_inputs() > 1 => {
            return Err(Error::malformed_at(
                index,
                format!(
                    "{} fuses at least {} inputs, but a single source {} is declared",
                    descriptor.name,
                    descriptor.min_inputs(),
                    from
                ),
            ));
        }
        _ => {}
    }

    let args: Vec<Arg> = args
        .iter()
        .cloned()
        .map(|arg| arg.substitute(symbols))
        .collect();
    descriptor
        .check_args(&args)
        .map_err(|reason| Error::malformed_at(index, reason))?;

    let layer = LayerSpec {
        index,
        section,
        sources: from.clone(),
        repeats: *repeats,
        kind: descriptor.kind,
        args,
    };
    debug!("parsed {} layer {}", section, layer);
    Ok(layer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleKind;

    fn spec(head: &str) -> Result<ModelSpec> {
        ModelSpec::from_json5_str(&format!(
            r#"{{
                nc: 80,
                backbone: [
                    [-1, 1, "Conv", [64, 3, 2]],
                    [-1, 1, "Conv", [128, 3, 2]],
                ],
                head: [{}],
            }}"#,
            head
        ))
    }

    #[test]
    fn head_indices_continue() -> Result<()> {
        let layers = parse_layers(&spec(
            r#"[-1, 1, "nn.Upsample", [null, 2, "nearest"]], [[-1, 0], 1, "Concat", [1]]"#,
        )?)?;
        assert_eq!(layers.len(), 4);
        assert_eq!(layers[2].index, 2);
        assert_eq!(layers[2].section, Section::Head);
        assert_eq!(layers[2].kind, ModuleKind::Upsample);
        assert_eq!(layers[3].sources.len(), 2);
        assert_eq!(layers[1].nominal_channels(), Some(128));
        Ok(())
    }

    #[test]
    fn substitute_class_count() -> Result<()> {
        let layers = parse_layers(&spec(r#"[[1], 1, "Detect", ["nc"]]"#)?)?;
        assert_eq!(layers[2].args, vec![Arg::Int(80)]);
        Ok(())
    }

    #[test]
    fn reject_records() -> Result<()> {
        let err = parse_layers(&spec(r#"[-1, 1, "Transformer", []]"#)?).unwrap_err();
        assert_eq!(
            err,
            Error::UnknownModule {
                index: Some(2),
                name: "Transformer".into()
            }
        );

        let err = parse_layers(&spec(r#"[-1, 1, "Concat", [1]]"#)?).unwrap_err();
        assert!(matches!(err, Error::MalformedSpec { index: Some(2), .. }));

        let err = parse_layers(&spec(r#"[-1, 1, "Conv", [0, 3, 1]]"#)?).unwrap_err();
        assert!(matches!(err, Error::MalformedSpec { index: Some(2), .. }));

        let err = parse_layers(&spec(r#"[[-1, 0], 2, "Concat", [1]]"#)?).unwrap_err();
        assert!(matches!(err, Error::MalformedSpec { index: Some(2), .. }));

        let err = parse_layers(&spec(r#"[-1, 0, "Conv", [64]]"#)?).unwrap_err();
        assert!(matches!(err, Error::MalformedSpec { index: Some(2), .. }));

        let err = parse_layers(&spec(r#"[-1, 1, "Conv", ["wide"]]"#)?).unwrap_err();
        assert_eq!(err.layer_index(), Some(2));
        Ok(())
    }
}
