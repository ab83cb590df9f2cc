#![forbid(unsafe_code)]

//! Transform instances and the stage trait they dispatch through.

use crate::buffer::Buffer;
use vaxholm_core::{Error, Result};
use vaxholm_keys::{Key, KeyReq};

/// Processing status of a transform instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransformStatus {
    #[default]
    None,
    Working,
    Finished,
    Failed,
}

impl std::fmt::Display for TransformStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransformStatus::None => "none",
            TransformStatus::Working => "working",
            TransformStatus::Finished => "finished",
            TransformStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Where a transform may legally appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformUsage(u32);

impl TransformUsage {
    /// Usable as a `Transform` inside a `Transforms` list.
    pub const DSIG_TRANSFORM: TransformUsage = TransformUsage(1);
    /// Usable as an `EncryptionMethod`.
    pub const ENCRYPTION_METHOD: TransformUsage = TransformUsage(2);
    /// No restriction (internal instantiation).
    pub const ANY: TransformUsage = TransformUsage(0);

    /// Combine usage flags.
    pub const fn union(self, other: TransformUsage) -> TransformUsage {
        TransformUsage(self.0 | other.0)
    }

    /// Check whether a declared usage allows the requested usage.
    pub fn allows(self, requested: TransformUsage) -> bool {
        requested.0 == 0 || self.0 & requested.0 != 0
    }
}

/// Input data kind a stage consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Binary,
    NodeSet,
}

/// Mutable per-instance state shared by every transform.
#[derive(Default)]
pub struct TransformState {
    pub status: TransformStatus,
    /// Forward (encrypt/encode) vs inverse (decrypt/decode) direction.
    pub encode: bool,
    pub in_buf: Buffer,
    pub out_buf: Buffer,
}

impl TransformState {
    /// Status bookkeeping shared by single-shot stages (cipher, base64,
    /// XSLT): the stage buffers input while `last` is false and performs
    /// its whole work in one step when `last` arrives.
    ///
    /// Returns `true` when the stage must run its work now.  Once the
    /// stage is finished, further calls are only legal with an empty
    /// input buffer.
    pub fn gate_single_shot(&mut self, name: &str, last: bool) -> Result<bool> {
        if self.status == TransformStatus::None {
            self.status = TransformStatus::Working;
        }
        match self.status {
            TransformStatus::Working if !last => Ok(false),
            TransformStatus::Working => Ok(true),
            TransformStatus::Finished if self.in_buf.is_empty() => Ok(false),
            TransformStatus::Finished => Err(Error::invalid_status(
                name,
                format!("{} bytes of input after finish", self.in_buf.len()),
            )),
            status => Err(Error::invalid_status(name, format!("status={status}"))),
        }
    }
}

/// A pluggable pipeline stage: the function table of a transform variant.
///
/// Default method bodies signal "not supported" or "nothing to do", so a
/// stage only implements what it needs (a codec has no key handling, a
/// cipher has no node configuration, …).
pub trait Stage: Send {
    /// Short name for diagnostics.
    fn name(&self) -> &'static str;

    /// The algorithm URI this stage implements.
    fn href(&self) -> &str;

    /// Where this stage may be instantiated from.
    fn usage(&self) -> TransformUsage;

    /// The input data kind this stage consumes.
    fn data_type(&self) -> DataType {
        DataType::Binary
    }

    /// Configure the stage from its `Transform`/`EncryptionMethod` element.
    fn read_node(&mut self, node: roxmltree::Node<'_, '_>) -> Result<()> {
        let _ = node;
        Ok(())
    }

    /// Declare the key this stage requires.  Stages without key material
    /// leave the requirement untouched.
    fn set_key_req(&self, encode: bool, req: &mut KeyReq) -> Result<()> {
        let _ = (encode, req);
        Ok(())
    }

    /// Install a key on the stage.
    fn set_key(&mut self, key: &Key, encode: bool) -> Result<()> {
        let _ = (key, encode);
        Err(Error::EngineFailed(format!(
            "transform {} does not accept a key",
            self.name()
        )))
    }

    /// Run the stage: consume from `state.in_buf`, produce into
    /// `state.out_buf`.  `last` signals end of input.
    fn execute(&mut self, state: &mut TransformState, last: bool) -> Result<()>;
}

impl std::fmt::Debug for dyn Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name())
            .field("href", &self.href())
            .finish()
    }
}

/// A pipeline node: a stage plus its buffers and status.
pub struct Transform {
    pub state: TransformState,
    stage: Box<dyn Stage>,
}

impl Transform {
    pub fn new(stage: Box<dyn Stage>) -> Self {
        Self {
            state: TransformState::default(),
            stage,
        }
    }

    pub fn name(&self) -> &'static str {
        self.stage.name()
    }

    pub fn href(&self) -> &str {
        self.stage.href()
    }

    pub fn status(&self) -> TransformStatus {
        self.state.status
    }

    pub fn data_type(&self) -> DataType {
        self.stage.data_type()
    }

    pub fn set_encode(&mut self, encode: bool) {
        self.state.encode = encode;
    }

    pub fn encode(&self) -> bool {
        self.state.encode
    }

    pub fn read_node(&mut self, node: roxmltree::Node<'_, '_>) -> Result<()> {
        self.stage.read_node(node)
    }

    pub fn set_key_req(&self, req: &mut KeyReq) -> Result<()> {
        self.stage.set_key_req(self.state.encode, req)
    }

    pub fn set_key(&mut self, key: &Key) -> Result<()> {
        self.stage.set_key(key, self.state.encode)
    }

    /// Step the stage, recording failure in the status.
    pub fn execute(&mut self, last: bool) -> Result<()> {
        match self.stage.execute(&mut self.state, last) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state.status = TransformStatus::Failed;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_allows() {
        let both = TransformUsage::DSIG_TRANSFORM.union(TransformUsage::ENCRYPTION_METHOD);
        assert!(both.allows(TransformUsage::DSIG_TRANSFORM));
        assert!(both.allows(TransformUsage::ENCRYPTION_METHOD));
        assert!(TransformUsage::DSIG_TRANSFORM.allows(TransformUsage::ANY));
        assert!(!TransformUsage::DSIG_TRANSFORM.allows(TransformUsage::ENCRYPTION_METHOD));
    }

    #[test]
    fn test_gate_single_shot_flow() {
        let mut state = TransformState::default();
        // first call moves None -> Working; nothing to do until last
        assert!(!state.gate_single_shot("t", false).unwrap());
        assert_eq!(state.status, TransformStatus::Working);
        // last=true triggers the work
        assert!(state.gate_single_shot("t", true).unwrap());

        state.status = TransformStatus::Finished;
        // finished with empty input: no-op
        assert!(!state.gate_single_shot("t", true).unwrap());
        // finished with pending input: invalid status
        state.in_buf.append(b"x");
        assert!(state.gate_single_shot("t", true).is_err());
    }
}
