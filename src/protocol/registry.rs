//! Handler registry.
//!
//! Maps `(module id, method name)` to an ordered list of [`HandlerDescriptor`]s.
//! Descriptors sharing a key are told apart by their mask at dispatch time.
//! The registry stores what it is told: it never deduplicates, so registering
//! the same handler twice means it runs twice per matching message.

use crate::core::types::{FromValue, PeerId, Value, WireType};
use crate::error::{ArgumentError, HandlerError, LookupError};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Result returned by handler bodies
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Invocation target stored in a descriptor
pub type HandlerFn = dyn Fn(&CallArgs) -> HandlerResult + Send + Sync + 'static;

/// Sender identity handed to handlers that ask for it. Never on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallInfo {
    pub sender: PeerId,
}

/// Decoded arguments for one handler invocation
#[derive(Debug, Clone, PartialEq)]
pub struct CallArgs {
    values: Vec<Value>,
    info: Option<CallInfo>,
}

impl CallArgs {
    pub fn new(values: Vec<Value>, info: Option<CallInfo>) -> Self {
        Self { values, info }
    }

    /// Typed access to the argument at `index`
    pub fn get<T: FromValue>(&self, index: usize) -> Result<T, ArgumentError> {
        let value = self.values.get(index);
        value.and_then(T::from_value).ok_or_else(|| ArgumentError {
            index,
            expected: T::WIRE_TYPE,
            found: value.map_or_else(|| "nothing".to_string(), |v| v.wire_type().to_string()),
        })
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Present only when the handler was registered with call-info
    pub fn info(&self) -> Option<CallInfo> {
        self.info
    }

    pub fn sender(&self) -> Option<PeerId> {
        self.info.map(|info| info.sender)
    }
}

/// A named, typed parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: WireType,
}

/// One callable method: its signature and invocation thunk.
#[derive(Clone)]
pub struct RpcMethod {
    name: String,
    params: Vec<Param>,
    takes_info: bool,
    handler: Arc<HandlerFn>,
}

impl RpcMethod {
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&CallArgs) -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            params: Vec::new(),
            takes_info: false,
            handler: Arc::new(handler),
        }
    }

    /// Append a wire parameter
    pub fn param(mut self, name: impl Into<String>, ty: WireType) -> Self {
        self.params.push(Param {
            name: name.into(),
            ty,
        });
        self
    }

    /// Declare a trailing call-info parameter
    pub fn with_call_info(mut self) -> Self {
        self.takes_info = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcMethod")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("takes_info", &self.takes_info)
            .finish_non_exhaustive()
    }
}

/// A registered handler: owning module, mask, and method.
#[derive(Debug, Clone)]
pub struct HandlerDescriptor {
    module_id: u32,
    mask: i32,
    method: RpcMethod,
}

impl HandlerDescriptor {
    pub fn new<F>(module_id: u32, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&CallArgs) -> HandlerResult + Send + Sync + 'static,
    {
        Self::from_method(module_id, 0, RpcMethod::new(method, handler))
    }

    pub fn from_method(module_id: u32, mask: i32, method: RpcMethod) -> Self {
        Self {
            module_id,
            mask,
            method,
        }
    }

    pub fn param(mut self, name: impl Into<String>, ty: WireType) -> Self {
        self.method = self.method.param(name, ty);
        self
    }

    pub fn with_call_info(mut self) -> Self {
        self.method = self.method.with_call_info();
        self
    }

    pub fn with_mask(mut self, mask: i32) -> Self {
        self.mask = mask;
        self
    }

    pub fn module_id(&self) -> u32 {
        self.module_id
    }

    pub fn method(&self) -> &str {
        &self.method.name
    }

    pub fn mask(&self) -> i32 {
        self.mask
    }

    /// Parameters carried on the wire, in declaration order
    pub fn params(&self) -> &[Param] {
        &self.method.params
    }

    pub fn takes_info(&self) -> bool {
        self.method.takes_info
    }

    /// Declared parameter count, call-info slot included
    pub fn parameter_count(&self) -> usize {
        self.method.params.len() + usize::from(self.method.takes_info)
    }

    /// Arguments a caller has to supply
    pub fn expected_args(&self) -> usize {
        self.parameter_count() - usize::from(self.method.takes_info)
    }

    pub fn invoke(&self, args: &CallArgs) -> HandlerResult {
        (self.method.handler)(args)
    }
}

/// Host object exposing RPC methods.
///
/// The host decides which of its methods are callable and describes each one;
/// the registry never inspects the object itself.
pub trait NetworkObject: Send + Sync + 'static {
    fn rpc_methods(self: Arc<Self>) -> Vec<RpcMethod>;
}

/// Registry of handlers keyed by module id, then method name
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    modules: HashMap<u32, HashMap<String, Vec<HandlerDescriptor>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a descriptor to the list for its key
    pub fn register(&mut self, descriptor: HandlerDescriptor) {
        debug!(
            module_id = descriptor.module_id(),
            method = descriptor.method(),
            mask = descriptor.mask(),
            "Registering RPC handler"
        );
        self.modules
            .entry(descriptor.module_id())
            .or_default()
            .entry(descriptor.method().to_owned())
            .or_default()
            .push(descriptor);
    }

    /// Register every method `object` exposes under `module_id` and `mask`.
    /// Returns the number of handlers added.
    pub fn register_object<O: NetworkObject>(
        &mut self,
        object: Arc<O>,
        module_id: u32,
        mask: i32,
    ) -> usize {
        let methods = object.rpc_methods();
        let count = methods.len();
        for method in methods {
            self.register(HandlerDescriptor::from_method(module_id, mask, method));
        }
        info!(
            module_id,
            mask,
            object = std::any::type_name::<O>(),
            "Registered {count} RPCs"
        );
        count
    }

    /// All descriptors for a key, in registration order
    pub fn lookup(&self, module_id: u32, method: &str) -> Result<&[HandlerDescriptor], LookupError> {
        let methods = self
            .modules
            .get(&module_id)
            .ok_or_else(|| LookupError::UnknownModule {
                module_id,
                loaded: self.module_ids(),
            })?;

        methods
            .get(method)
            .map(Vec::as_slice)
            .ok_or_else(|| LookupError::UnknownMethod {
                module_id,
                method: method.to_owned(),
            })
    }

    pub fn contains(&self, module_id: u32, method: &str) -> bool {
        self.lookup(module_id, method).is_ok()
    }

    /// Registered module ids, ascending
    pub fn module_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.modules.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Total number of descriptors
    pub fn len(&self) -> usize {
        self.modules
            .values()
            .flat_map(HashMap::values)
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
