//! Depth-first wiring of the component graph.
//!
//! Runs single-threaded during startup. The active chain of component type
//! keys travels with the recursion; re-entering a type on the chain is a
//! cyclic dependency and aborts startup before any init hook runs.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::app::{Application, HookContext};
use crate::component::{FieldDecl, Injected, TypeKey};
use crate::definition::SharedDefinition;
use crate::error::{AppError, AppResult};

/// Wire every registered definition, registration order.
pub(crate) fn wire_all(app: &Application) -> AppResult<()> {
    for definition in app.registry().definitions() {
        wire(app, &definition, Vec::new())?;
    }
    Ok(())
}

/// Wire one definition and, recursively, everything it depends on.
pub(crate) fn wire(
    app: &Application,
    definition: &SharedDefinition,
    mut chain: Vec<TypeKey>,
) -> AppResult<()> {
    if definition.is_ready() {
        return Ok(());
    }
    let key = definition.type_key();
    if chain.contains(&key) {
        let mut names: Vec<&str> = chain.iter().map(|k| k.name).collect();
        names.push(key.name);
        return Err(AppError::cyclic(&names));
    }
    chain.push(key);
    definition.mark_wiring();
    debug!(component = definition.name(), "wiring component");

    // Config-backed components are populated by the environment, not by
    // other components.
    if let Some(config) = definition.config_backing() {
        app.env().bind_dyn(
            &config.prefix,
            Arc::clone(&config.bindable),
            config.type_id,
            config.listen,
        )?;
        definition.mark_ready(app.registry().next_ready_seq());
        return Ok(());
    }

    for field in definition.fields() {
        match field {
            FieldDecl::Value {
                field,
                expr,
                required,
            } => {
                let text = if *required {
                    app.env().resolve_required_placeholders(expr)?
                } else {
                    app.env().resolve_placeholders(expr)?
                };
                definition
                    .handle()
                    .write()
                    .assign(field, Injected::Text(text))?;
            }
            FieldDecl::Ref {
                field,
                name: Some(name),
                required,
                ..
            } => match app.registry().get(name) {
                Some(dependency) => {
                    wire(app, &dependency, chain.clone())?;
                    definition
                        .handle()
                        .write()
                        .assign(field, Injected::One(dependency.view()))?;
                }
                None if *required => {
                    return Err(AppError::missing(definition.name(), *field));
                }
                None => {
                    debug!(
                        component = definition.name(),
                        field, dependency = %name, "optional dependency absent"
                    );
                }
            },
            FieldDecl::Ref {
                field,
                key: Some(key),
                required,
                collection: false,
                ..
            } => match app.registry().primary_of(*key) {
                Ok(dependency) => {
                    wire(app, &dependency, chain.clone())?;
                    definition
                        .handle()
                        .write()
                        .assign(field, Injected::One(dependency.view()))?;
                }
                Err(AppError::TypeNotFound { .. }) if !*required => {
                    debug!(
                        component = definition.name(),
                        field, dependency = key.name, "optional dependency absent"
                    );
                }
                Err(AppError::TypeNotFound { .. }) => {
                    return Err(AppError::missing(definition.name(), *field));
                }
                // LookupAmbiguous propagates as-is.
                Err(err) => return Err(err),
            },
            FieldDecl::Ref {
                field,
                key: Some(key),
                required,
                collection: true,
                ..
            } => {
                let mut candidates = app.registry().definitions_of(*key);
                for dependency in &candidates {
                    wire(app, dependency, chain.clone())?;
                }
                if candidates.is_empty() && *required {
                    return Err(AppError::missing(definition.name(), *field));
                }
                // Stable sort: ties keep registration order.
                candidates.sort_by_key(|d| d.order());
                let views = candidates.iter().map(|d| d.view()).collect();
                definition
                    .handle()
                    .write()
                    .assign(field, Injected::Many(views))?;
            }
            FieldDecl::Ref { field, .. } => {
                // Not constructible through the registration builder.
                warn!(
                    component = definition.name(),
                    field, "field declares neither name nor type; skipped"
                );
            }
        }
    }

    if let Some(hook) = definition.init_hook() {
        let context = HookContext {
            env: app.env(),
            app,
        };
        hook(&mut *definition.handle().write(), &context)?;
    }
    definition.mark_ready(app.registry().next_ready_seq());
    Ok(())
}
