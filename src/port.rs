//! Typed port handles.
//!
//! A stage receives its ports from a [`PortFactory`] while it is being
//! created. Until `PipelineBuilder::build` runs, every port is an unbound
//! placeholder and any push or pop on it fails with `StageError::UnboundPort`.
//! `build()` binds both ends of every connection to the buffer chosen by
//! `connect()`.

use crate::buffer::Buffer;
use crate::error::{Halt, Iteration, StageError};
use crate::stage::StageId;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Direction {
    Input,
    Output,
}

impl Direction {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

/// Identifies a port within one builder
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct PortKey {
    pub(crate) stage: StageId,
    pub(crate) direction: Direction,
    pub(crate) name: String,
}

struct PortSlot<T> {
    key: PortKey,
    stage_name: String,
    builder: u64,
    buffer: OnceLock<Arc<dyn Buffer<T>>>,
}

impl<T> PortSlot<T> {
    fn buffer(&self) -> Result<&Arc<dyn Buffer<T>>, Halt> {
        self.buffer
            .get()
            .ok_or_else(|| StageError::UnboundPort(self.label()).into())
    }

    fn label(&self) -> String {
        format!("{}.{}", self.stage_name, self.key.name)
    }
}

macro_rules! port_handle {
    ($name:ident) => {
        impl<T> $name<T> {
            /// Port name as declared by the stage
            pub fn name(&self) -> &str {
                &self.slot.key.name
            }

            /// The stage owning this port
            pub fn stage(&self) -> StageId {
                self.slot.key.stage
            }

            /// Whether `build()` has bound this port to a buffer
            pub fn is_bound(&self) -> bool {
                self.slot.buffer.get().is_some()
            }

            pub(crate) fn key(&self) -> &PortKey {
                &self.slot.key
            }

            pub(crate) fn stage_name(&self) -> &str {
                &self.slot.stage_name
            }

            pub(crate) fn builder_id(&self) -> u64 {
                self.slot.builder
            }
        }

        impl<T> Clone for $name<T> {
            fn clone(&self) -> Self {
                Self {
                    slot: Arc::clone(&self.slot),
                }
            }
        }

        impl<T> fmt::Debug for $name<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("port", &self.slot.label())
                    .field("bound", &self.is_bound())
                    .finish()
            }
        }
    };
}

/// Producer side of a connection
pub struct Output<T> {
    slot: Arc<PortSlot<T>>,
}

/// Consumer side of a connection
pub struct Input<T> {
    slot: Arc<PortSlot<T>>,
}

port_handle!(Output);
port_handle!(Input);

impl<T> Output<T> {
    /// Hand an item downstream, blocking while the buffer is full
    pub fn push(&self, value: T) -> Result<(), Halt> {
        self.slot.buffer()?.push(value)
    }

    /// Declare that no more items will follow.
    ///
    /// Always returns `Err`: `Halt::EndOfStream` once the buffer is ended,
    /// so a stage can finish with `return self.output.end();`.
    pub fn end(&self) -> Iteration {
        Err(self.slot.buffer()?.end())
    }
}

impl<T> Input<T> {
    /// Take the next item, blocking while the buffer is empty
    pub fn pop(&self) -> Result<T, Halt> {
        self.slot.buffer()?.pop()
    }
}

/// Hands out port placeholders to a stage under construction
pub struct PortFactory<'a> {
    builder: u64,
    stage: StageId,
    stage_name: &'a str,
    declared: Vec<DeclaredPort>,
    duplicate: Option<String>,
}

pub(crate) struct DeclaredPort {
    pub(crate) key: PortKey,
    pub(crate) handle: Box<dyn Any + Send + Sync>,
}

impl<'a> PortFactory<'a> {
    pub(crate) fn new(builder: u64, stage: StageId, stage_name: &'a str) -> Self {
        Self {
            builder,
            stage,
            stage_name,
            declared: Vec::new(),
            duplicate: None,
        }
    }

    /// Declare an output port carrying items of type `T`
    pub fn output<T: Send + 'static>(&mut self, name: &str) -> Output<T> {
        let slot = self.slot(name, Direction::Output);
        let port = Output { slot };
        self.declare(port.key().clone(), Box::new(port.clone()));
        port
    }

    /// Declare an input port carrying items of type `T`
    pub fn input<T: Send + 'static>(&mut self, name: &str) -> Input<T> {
        let slot = self.slot(name, Direction::Input);
        let port = Input { slot };
        self.declare(port.key().clone(), Box::new(port.clone()));
        port
    }

    fn slot<T>(&self, name: &str, direction: Direction) -> Arc<PortSlot<T>> {
        Arc::new(PortSlot {
            key: PortKey {
                stage: self.stage,
                direction,
                name: name.to_string(),
            },
            stage_name: self.stage_name.to_string(),
            builder: self.builder,
            buffer: OnceLock::new(),
        })
    }

    fn declare(&mut self, key: PortKey, handle: Box<dyn Any + Send + Sync>) {
        if self.declared.iter().any(|port| port.key == key) {
            self.duplicate.get_or_insert(key.name);
            return;
        }
        self.declared.push(DeclaredPort { key, handle });
    }

    /// Declared ports, or the name of the first port declared twice
    pub(crate) fn finish(self) -> Result<Vec<DeclaredPort>, String> {
        match self.duplicate {
            Some(name) => Err(name),
            None => Ok(self.declared),
        }
    }
}

/// A connection recorded by `connect()` and applied by `build()`
pub(crate) trait Binding: Send {
    fn bind(self: Box<Self>);
}

struct Connection<T> {
    output: Output<T>,
    input: Input<T>,
    buffer: Arc<dyn Buffer<T>>,
}

impl<T: Send + 'static> Binding for Connection<T> {
    fn bind(self: Box<Self>) {
        // `connect()` refuses ports that are already connected, so each slot is set once
        let _ = self.output.slot.buffer.set(Arc::clone(&self.buffer));
        let _ = self.input.slot.buffer.set(self.buffer);
    }
}

pub(crate) fn connection<T: Send + 'static>(
    output: &Output<T>,
    input: &Input<T>,
    buffer: Arc<dyn Buffer<T>>,
) -> Box<dyn Binding> {
    Box::new(Connection {
        output: output.clone(),
        input: input.clone(),
        buffer,
    })
}
