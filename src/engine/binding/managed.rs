//! Managed binding: engines loaded as in-process modules.
//!
//! A [`ManagedModule`] exports types, and each type exports routines that
//! describe themselves by name, staticness and the ordered field names of
//! their parameter and return records. Discovery looks for one public type
//! exporting a static `GetInformation()` and a static `DoResampler(input)`
//! whose shapes match the contract schema exactly. The check runs once, when
//! the binding is created; afterwards calls go straight to the routines.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use serde_json::Value;

use super::{EngineBinding, InvokeContext, Probe};
use crate::contract::schema::{
    shape_mismatch, CAPABILITY_ROUTINE, ENGINE_INFO_FIELDS, ENGINE_INPUT_FIELDS,
    ENGINE_OUTPUT_FIELDS, SYNTHESIS_ROUTINE,
};
use crate::contract::{EngineInfo, EngineInput, EngineOutput};
use crate::engine::descriptor::BindingKind;
use crate::error::{EngineError, InvocationCause};

/// Callable body of an exported routine.
pub type RoutineBody = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// Structural description of a record: its type name and ordered fields.
///
/// Only the field list takes part in matching; the type name is free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeShape {
    pub type_name: String,
    pub fields: Vec<String>,
}

impl TypeShape {
    pub fn new(type_name: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            type_name: type_name.into(),
            fields: fields.iter().map(|field| field.to_string()).collect(),
        }
    }

    pub fn engine_info() -> Self {
        Self::new("EngineInformation", ENGINE_INFO_FIELDS)
    }

    pub fn engine_input() -> Self {
        Self::new("EngineInput", ENGINE_INPUT_FIELDS)
    }

    pub fn engine_output() -> Self {
        Self::new("EngineOutput", ENGINE_OUTPUT_FIELDS)
    }
}

/// A routine exported by a module type.
#[derive(Clone)]
pub struct ExportedRoutine {
    pub name: String,
    pub is_static: bool,
    pub parameters: Vec<TypeShape>,
    pub returns: TypeShape,
    body: RoutineBody,
}

impl ExportedRoutine {
    pub fn new<F>(
        name: impl Into<String>,
        is_static: bool,
        parameters: Vec<TypeShape>,
        returns: TypeShape,
        body: F,
    ) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            is_static,
            parameters,
            returns,
            body: Arc::new(body),
        }
    }

    fn capability_mismatch(&self) -> Option<String> {
        if !self.is_static {
            return Some(format!("{} is not static", self.name));
        }
        if !self.parameters.is_empty() {
            return Some(format!(
                "{} takes {} parameters, expected none",
                self.name,
                self.parameters.len()
            ));
        }
        shape_mismatch(ENGINE_INFO_FIELDS, &self.returns.fields)
            .map(|reason| format!("{} return type: {}", self.name, reason))
    }

    fn synthesis_mismatch(&self) -> Option<String> {
        if !self.is_static {
            return Some(format!("{} is not static", self.name));
        }
        if self.parameters.len() != 1 {
            return Some(format!(
                "{} takes {} parameters, expected one",
                self.name,
                self.parameters.len()
            ));
        }
        if let Some(reason) = shape_mismatch(ENGINE_INPUT_FIELDS, &self.parameters[0].fields) {
            return Some(format!("{} parameter type: {}", self.name, reason));
        }
        shape_mismatch(ENGINE_OUTPUT_FIELDS, &self.returns.fields)
            .map(|reason| format!("{} return type: {}", self.name, reason))
    }
}

impl std::fmt::Debug for ExportedRoutine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportedRoutine")
            .field("name", &self.name)
            .field("is_static", &self.is_static)
            .field("parameters", &self.parameters)
            .field("returns", &self.returns)
            .finish()
    }
}

/// A type exported by a module.
#[derive(Debug, Clone)]
pub struct ExportedType {
    pub name: String,
    pub is_public: bool,
    pub routines: Vec<ExportedRoutine>,
}

impl ExportedType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_public: true,
            routines: Vec::new(),
        }
    }

    pub fn private(name: impl Into<String>) -> Self {
        Self {
            is_public: false,
            ..Self::new(name)
        }
    }

    pub fn with_routine(mut self, routine: ExportedRoutine) -> Self {
        self.routines.push(routine);
        self
    }

    fn routine(&self, name: &str) -> Option<&ExportedRoutine> {
        self.routines.iter().find(|routine| routine.name == name)
    }
}

/// An in-process module that may contain an engine.
#[derive(Debug, Clone)]
pub struct ManagedModule {
    identity: String,
    types: Vec<ExportedType>,
}

impl ManagedModule {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            types: Vec::new(),
        }
    }

    pub fn with_type(mut self, exported: ExportedType) -> Self {
        self.types.push(exported);
        self
    }

    /// Build a conforming module from a typed engine implementation.
    pub fn from_engine<E: ManagedEngine>(
        identity: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Self {
        let describe = ExportedRoutine::new(
            CAPABILITY_ROUTINE,
            true,
            Vec::new(),
            TypeShape::engine_info(),
            |_args: &[Value]| serde_json::to_value(E::information()).map_err(|e| e.to_string()),
        );
        let resample = ExportedRoutine::new(
            SYNTHESIS_ROUTINE,
            true,
            vec![TypeShape::engine_input()],
            TypeShape::engine_output(),
            |args: &[Value]| {
                let arg = args
                    .first()
                    .cloned()
                    .ok_or_else(|| "missing input argument".to_string())?;
                let input: EngineInput = serde_json::from_value(arg).map_err(|e| e.to_string())?;
                let output = E::resample(input)?;
                serde_json::to_value(output).map_err(|e| e.to_string())
            },
        );
        Self::new(identity).with_type(
            ExportedType::new(type_name)
                .with_routine(describe)
                .with_routine(resample),
        )
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn types(&self) -> &[ExportedType] {
        &self.types
    }
}

/// Typed shortcut for writing a managed engine in Rust.
///
/// Both routines are associated functions, mirroring the static routines
/// the module exports.
pub trait ManagedEngine: Send + Sync + 'static {
    fn information() -> EngineInfo;
    fn resample(input: EngineInput) -> Result<EngineOutput, String>;
}

/// Modules currently loaded in this process, keyed by identity.
#[derive(Default)]
pub struct ModuleCatalog {
    modules: RwLock<HashMap<String, Arc<ManagedModule>>>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a module, replacing any previous module with the same identity.
    pub fn load(&self, module: ManagedModule) -> Result<(), EngineError> {
        let mut modules = self.modules.write().map_err(|_| EngineError::LockPoisoned {
            component: "module_catalog".to_string(),
        })?;
        log::info!("[ModuleCatalog] Loaded module {}", module.identity());
        modules.insert(module.identity.clone(), Arc::new(module));
        Ok(())
    }

    pub fn unload(&self, identity: &str) -> Result<bool, EngineError> {
        let mut modules = self.modules.write().map_err(|_| EngineError::LockPoisoned {
            component: "module_catalog".to_string(),
        })?;
        Ok(modules.remove(identity).is_some())
    }

    pub fn get(&self, identity: &str) -> Result<Option<Arc<ManagedModule>>, EngineError> {
        let modules = self.modules.read().map_err(|_| EngineError::LockPoisoned {
            component: "module_catalog".to_string(),
        })?;
        Ok(modules.get(identity).cloned())
    }
}

/// Binding to a conforming type inside a managed module.
pub struct ManagedBinding {
    location: String,
    type_name: String,
    query: RoutineBody,
    synthesize: RoutineBody,
}

impl ManagedBinding {
    /// Look for a conforming routine pair inside `module`.
    pub fn probe(location: &str, module: &ManagedModule) -> Probe {
        let mut rejected = Vec::new();

        for exported in module.types.iter().filter(|t| t.is_public) {
            let (Some(query), Some(synthesize)) = (
                exported.routine(CAPABILITY_ROUTINE),
                exported.routine(SYNTHESIS_ROUTINE),
            ) else {
                continue;
            };

            let mismatch = query
                .capability_mismatch()
                .or_else(|| synthesize.synthesis_mismatch());
            match mismatch {
                Some(reason) => rejected.push(format!("{}: {}", exported.name, reason)),
                None => {
                    log::debug!(
                        "[ManagedBinding] {} conforms in module {}",
                        exported.name,
                        module.identity
                    );
                    return Probe::Bound(Box::new(ManagedBinding {
                        location: location.to_string(),
                        type_name: exported.name.clone(),
                        query: Arc::clone(&query.body),
                        synthesize: Arc::clone(&synthesize.body),
                    }));
                }
            }
        }

        if rejected.is_empty() {
            Probe::Unrecognized(format!(
                "module {} exports no public type with {} and {}",
                module.identity, CAPABILITY_ROUTINE, SYNTHESIS_ROUTINE
            ))
        } else {
            Probe::Unrecognized(rejected.join("; "))
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }
}

impl EngineBinding for ManagedBinding {
    fn kind(&self) -> BindingKind {
        BindingKind::Managed
    }

    fn describe(&self) -> Result<EngineInfo, EngineError> {
        let value = call_guarded(&self.query, &[])
            .map_err(|cause| EngineError::describe(&self.location, cause.to_string()))?;
        serde_json::from_value(value)
            .map_err(|e| EngineError::describe(&self.location, e.to_string()))
    }

    fn invoke(
        &self,
        input: &EngineInput,
        _ctx: &InvokeContext,
    ) -> Result<EngineOutput, EngineError> {
        let arg = serde_json::to_value(input).map_err(|e| {
            EngineError::invocation(&self.location, InvocationCause::Encoding(e.to_string()))
        })?;
        let value = call_guarded(&self.synthesize, &[arg]).map_err(|cause| {
            EngineError::invocation(&self.location, cause)
        })?;
        serde_json::from_value(value).map_err(|e| {
            EngineError::invocation(&self.location, InvocationCause::Encoding(e.to_string()))
        })
    }
}

fn call_guarded(body: &RoutineBody, args: &[Value]) -> Result<Value, InvocationCause> {
    match catch_unwind(AssertUnwindSafe(|| (**body)(args))) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(message)) => Err(InvocationCause::Engine(message)),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(InvocationCause::Panicked(message))
        }
    }
}
