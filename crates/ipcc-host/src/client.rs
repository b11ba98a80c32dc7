//! The operation catalogue.
//!
//! Every operation takes the channel, opens the transport, runs its
//! transactions, closes the transport and releases the channel, in that
//! order, whether or not the transactions succeed.

use ipcc_frame::command::{hss, sp};
use ipcc_frame::MAX_DATA_SIZE;
use ipcc_transport::IpccOps;
use tracing::debug;

use crate::channel::{CancelToken, Channel, ChannelGuard};
use crate::config::EngineConfig;
use crate::engine::Session;
use crate::error::{HostError, Result};
use crate::types::{
    Ident, Inventory, KeyLookup, KeyLookupResult, KeySetResult, MacBlock, SpStatus,
    IDENT_LEN, IMAGE_HASH_LEN, MAC_BLOCK_LEN,
};

/// Copies a variable-length reply into the caller's buffer.
fn copy_reply(command: &'static str, reply: &[u8], buf: &mut [u8]) -> Result<usize> {
    let max = buf.len();
    let dst = buf.get_mut(..reply.len()).ok_or(HostError::ReplyTooLarge {
        command,
        size: reply.len(),
        max,
    })?;
    dst.copy_from_slice(reply);
    Ok(reply.len())
}

/// High-level access to the SP over one capability set.
pub struct IpccClient<'c, O: IpccOps> {
    ops: O,
    channel: &'c Channel,
    config: EngineConfig,
    cancel: Option<CancelToken>,
}

impl<O: IpccOps> IpccClient<'static, O> {
    /// A client on the process-wide channel.
    pub fn new(ops: O) -> Self {
        Self::with_channel(ops, Channel::global())
    }
}

impl<'c, O: IpccOps> IpccClient<'c, O> {
    pub fn with_channel(ops: O, channel: &'c Channel) -> Self {
        Self {
            ops,
            channel,
            config: EngineConfig::default(),
            cancel: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Lets a blocked channel acquisition be abandoned.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn channel(&self) -> &'c Channel {
        self.channel
    }

    pub fn ops(&self) -> &O {
        &self.ops
    }

    pub fn ops_mut(&mut self) -> &mut O {
        &mut self.ops
    }

    pub fn into_inner(self) -> O {
        self.ops
    }

    /// Runs `f` with the channel held and the transport open.
    pub fn session<T>(&mut self, f: impl FnOnce(&mut Session<'_, O>) -> Result<T>) -> Result<T> {
        let channel = self.channel;
        let mut guard = channel.acquire(self.cancel.as_ref())?;
        self.run_held(&mut guard, f)
    }

    fn run_held<T>(
        &mut self,
        guard: &mut ChannelGuard<'_>,
        f: impl FnOnce(&mut Session<'_, O>) -> Result<T>,
    ) -> Result<T> {
        self.ops.open()?;
        let result = {
            let mut session = Session::new(guard, &mut self.ops, &self.config);
            f(&mut session)
        };
        self.ops.close();
        result
    }

    /// Asks the SP to reset the host.
    ///
    /// # Safety
    ///
    /// Seizes the channel with [`Channel::acquire_forced`]; the caller must
    /// ensure no other holder is mid-transaction.
    pub unsafe fn reboot(&mut self) -> Result<()> {
        debug!("requesting host reboot");
        let channel = self.channel;
        // SAFETY: forwarded to the caller.
        let mut guard = unsafe { channel.acquire_forced() };
        self.run_held(&mut guard, |s| s.execute(hss::REBOOT, None, &[], 0).map(drop))
    }

    /// Asks the SP to power the host off.
    pub fn poweroff(&mut self) -> Result<()> {
        debug!("requesting host power-off");
        self.session(|s| s.execute(hss::POWEROFF, None, &[], 0).map(drop))
    }

    /// Hands a panic record to the SP.
    ///
    /// # Safety
    ///
    /// Same contract as [`IpccClient::reboot`].
    pub unsafe fn panic(&mut self, record: &[u8]) -> Result<()> {
        let channel = self.channel;
        // SAFETY: forwarded to the caller.
        let mut guard = unsafe { channel.acquire_forced() };
        self.run_held(&mut guard, |s| s.execute(hss::PANIC, Some(sp::ACK), record, 0).map(drop))
    }

    pub fn ackstart(&mut self) -> Result<()> {
        self.session(|s| s.ackstart())
    }

    /// Boot storage unit the host should boot from.
    pub fn bsu(&mut self) -> Result<u8> {
        self.session(|s| {
            let reply = s.execute(hss::BSU, Some(sp::BSU), &[], 1)?;
            Ok(reply[0])
        })
    }

    pub fn ident(&mut self) -> Result<Ident> {
        self.session(|s| Ident::decode(s.execute(hss::IDENT, Some(sp::IDENT), &[], IDENT_LEN)?))
    }

    pub fn macs(&mut self) -> Result<MacBlock> {
        self.session(|s| {
            MacBlock::decode(s.execute(hss::MACS, Some(sp::MACS), &[], MAC_BLOCK_LEN)?)
        })
    }

    pub fn status(&mut self) -> Result<SpStatus> {
        self.session(|s| s.query_status())
    }

    /// Looks up `key`, copying its value into `buf`.
    pub fn keylookup(&mut self, key: u8, buf: &mut [u8]) -> Result<KeyLookup> {
        let max_len = u16::try_from(buf.len().min(MAX_DATA_SIZE - 1)).unwrap_or(u16::MAX);
        let mut request = [0u8; 3];
        request[0] = key;
        request[1..].copy_from_slice(&max_len.to_le_bytes());

        self.session(|s| {
            let reply = s.execute(hss::KEYLOOKUP, Some(sp::KEYLOOKUP), &request, 0)?;
            let Some((&code, value)) = reply.split_first() else {
                return Err(HostError::MalformedReply {
                    command: "KEYLOOKUP",
                    reason: "missing result code",
                });
            };
            let result = KeyLookupResult::from(code);
            let len = if result == KeyLookupResult::Success {
                copy_reply("KEYLOOKUP", value, buf)?
            } else {
                0
            };
            Ok(KeyLookup { result, len })
        })
    }

    /// Stores `data` under `key`.
    pub fn keyset(&mut self, key: u8, data: &[u8]) -> Result<KeySetResult> {
        self.session(|s| {
            let reply = s.execute_vectored(hss::KEYSET, Some(sp::KEYSET), &[&[key][..], data], 1)?;
            Ok(KeySetResult::from(reply[0]))
        })
    }

    /// Relays an opaque root-of-trust request, copying the reply into `buf`.
    pub fn rot(&mut self, request: &[u8], buf: &mut [u8]) -> Result<usize> {
        self.session(|s| {
            let reply = s.execute(hss::ROT, Some(sp::ROT), request, 0)?;
            copy_reply("ROT", reply, buf)
        })
    }

    /// Reports a boot failure.
    pub fn bootfail(&mut self, reason: u8, data: &[u8]) -> Result<()> {
        self.session(|s| {
            s.execute_vectored(hss::BOOTFAIL, Some(sp::ACK), &[&[reason][..], data], 0)
                .map(drop)
        })
    }

    /// Fetches the chunk of the image identified by `hash` starting at
    /// `offset`. Returns the number of bytes copied into `buf`; zero means
    /// the SP has nothing more.
    pub fn imageblock(
        &mut self,
        hash: &[u8; IMAGE_HASH_LEN],
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize> {
        let offset = offset.to_le_bytes();
        self.session(|s| {
            let parts = [&hash[..], &offset[..]];
            let reply = s.execute_vectored(hss::IMAGEBLOCK, Some(sp::IMAGEBLOCK), &parts, 0)?;
            copy_reply("IMAGEBLOCK", reply, buf)
        })
    }

    /// Reads one entry of the SP's hardware inventory.
    pub fn inventory(&mut self, index: u32) -> Result<Inventory> {
        self.session(|s| {
            let reply = s.execute(hss::INVENTORY, Some(sp::INVENTORY), &index.to_le_bytes(), 0)?;
            Inventory::decode(index, reply)
        })
    }
}
