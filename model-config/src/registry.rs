//! The module registry, built once from the closed set of module kinds.

use crate::{
    common::*,
    error::Error,
    module::{ModuleDescriptor, ModuleKind},
};

static REGISTRY: Lazy<HashMap<&'static str, &'static ModuleDescriptor>> = Lazy::new(|| {
    ModuleKind::iter()
        .map(|kind| kind.descriptor())
        .flat_map(|descriptor| {
            iter::once(descriptor.name)
                .chain(descriptor.aliases.iter().copied())
                .map(move |name| (name, descriptor))
        })
        .collect()
});

/// Finds the descriptor registered under a module name or alias.
pub fn lookup(name: &str) -> Result<&'static ModuleDescriptor, Error> {
    REGISTRY
        .get(name)
        .copied()
        .ok_or_else(|| Error::UnknownModule {
            index: None,
            name: name.to_owned(),
        })
}

/// Iterates over all registered names, aliases included.
pub fn names() -> impl Iterator<Item = &'static str> {
    REGISTRY.keys().copied().sorted()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_names_and_aliases() -> Result<()> {
        assert_eq!(lookup("C2f")?.kind, ModuleKind::C2f);
        assert_eq!(lookup("nn.Upsample")?.kind, ModuleKind::Upsample);
        assert_eq!(lookup("Upsample")?.kind, ModuleKind::Upsample);
        assert_eq!("Detect".parse::<ModuleKind>()?, ModuleKind::Detect);
        assert_eq!(names().count(), ModuleKind::iter().count() + 1);
        Ok(())
    }

    #[test]
    fn unknown_module() {
        assert_eq!(
            lookup("Transformer"),
            Err(Error::UnknownModule {
                index: None,
                name: "Transformer".into()
            })
        );
    }
}
