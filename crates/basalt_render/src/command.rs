//! # Command Envelopes
//!
//! The wire format of the command stream. Every operation a client submits
//! becomes one envelope in the frame arena: a fixed 16-byte [`CommandHeader`]
//! followed immediately by a typed payload. Envelopes sit back to back, so
//! the consumer advances through a buffer using nothing but `header.size`.
//!
//! The header is untyped on the wire (`kind` + `code` integers) and decoded
//! into a [`CommandKind`] before dispatch, so downstream code matches on a
//! tagged enum instead of trusting raw discriminants twice.

use bytemuck::{Pod, Zeroable};

use crate::handle::Handle;
use crate::resource::ResourceType;

/// Size of one [`CommandHeader`] on the wire.
pub const HEADER_SIZE: usize = core::mem::size_of::<CommandHeader>();

const KIND_CREATE: u8 = 0;
const KIND_SET: u8 = 1;
const KIND_SUBMIT: u8 = 2;

/// Fixed prefix of every envelope.
///
/// `size` covers the header and the payload, before arena rounding. The
/// `code` field is overloaded: for creations it holds the [`ResourceType`]
/// code, for submits the [`RenderMessage`] code, and for sets it is zero.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct CommandHeader {
    /// Total envelope length in bytes, header included.
    pub size: u32,
    /// Verb discriminant (create / set / submit).
    pub kind: u8,
    /// Keeps `code` naturally aligned.
    pub _pad: u8,
    /// Verb-specific code, see [`CommandKind::decode`].
    pub code: u16,
    /// Target of the command; [`Handle::NONE`] for global submits.
    pub handle: Handle,
}

// The consumer walks buffers by header size alone; the header layout is
// load-bearing for every envelope ever written.
const _: () = assert!(HEADER_SIZE == 16);

impl CommandHeader {
    /// Builds a header for a creation envelope.
    #[must_use]
    pub fn create(ty: ResourceType, handle: Handle, payload_len: usize) -> Self {
        Self::new(KIND_CREATE, ty.code(), handle, payload_len)
    }

    /// Builds a header for a set envelope.
    #[must_use]
    pub fn set(handle: Handle, payload_len: usize) -> Self {
        Self::new(KIND_SET, 0, handle, payload_len)
    }

    /// Builds a header for a submit envelope.
    #[must_use]
    pub fn submit(message: RenderMessage, handle: Handle, payload_len: usize) -> Self {
        Self::new(KIND_SUBMIT, message.code(), handle, payload_len)
    }

    fn new(kind: u8, code: u16, handle: Handle, payload_len: usize) -> Self {
        Self {
            size: (HEADER_SIZE + payload_len) as u32,
            kind,
            _pad: 0,
            code,
            handle,
        }
    }

    /// Payload length carried after this header.
    #[inline]
    #[must_use]
    pub const fn payload_len(&self) -> usize {
        self.size as usize - HEADER_SIZE
    }
}

/// Message codes for submit envelopes.
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderMessage {
    /// Clear the bound render target.
    Clear = 0,
    /// Change the clear color.
    SetClearColor = 1,
    /// Bind a texture to a sampler slot.
    BindTexture = 2,
    /// Issue an indexed draw.
    DrawIndexed = 3,
    /// Enable or disable a pipeline option.
    Toggle = 4,
    /// Change the viewport rectangle.
    SetViewport = 5,
    /// Destroy the resource named by the envelope handle.
    Destroy = 6,
    /// Map the buffer named by the envelope handle.
    MapBuffer = 7,
    /// Unmap the buffer named by the envelope handle.
    UnmapBuffer = 8,
}

impl RenderMessage {
    /// Wire code for the header.
    #[inline]
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Decodes a wire code.
    ///
    /// # Panics
    ///
    /// Panics on an unknown code; the stream is corrupt.
    #[must_use]
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => Self::Clear,
            1 => Self::SetClearColor,
            2 => Self::BindTexture,
            3 => Self::DrawIndexed,
            4 => Self::Toggle,
            5 => Self::SetViewport,
            6 => Self::Destroy,
            7 => Self::MapBuffer,
            8 => Self::UnmapBuffer,
            other => panic!("unknown render message code {other}"),
        }
    }
}

/// A decoded envelope verb.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandKind {
    /// Create a backend resource; the header handle receives the ID.
    Create(ResourceType),
    /// Replace the data of the resource named by the header handle.
    Set,
    /// A message-tagged imperative.
    Submit(RenderMessage),
}

impl CommandKind {
    /// Decodes a header's verb and code fields.
    ///
    /// # Panics
    ///
    /// Panics on an unknown verb or code; a corrupt stream cannot be
    /// re-synchronized.
    #[must_use]
    pub fn decode(header: &CommandHeader) -> Self {
        match header.kind {
            KIND_CREATE => Self::Create(ResourceType::from_code(header.code)),
            KIND_SET => Self::Set,
            KIND_SUBMIT => Self::Submit(RenderMessage::from_code(header.code)),
            other => panic!("unknown command kind {other}"),
        }
    }
}

/// How a mapped buffer region will be used.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapAccess {
    /// Caller only reads the region.
    Read = 0,
    /// Caller only writes the region.
    Write = 1,
    /// Caller reads and writes the region.
    ReadWrite = 2,
}

impl MapAccess {
    /// Wire code for the map payload.
    #[inline]
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Decodes a wire code.
    ///
    /// # Panics
    ///
    /// Panics on an unknown code.
    #[must_use]
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Read,
            1 => Self::Write,
            2 => Self::ReadWrite,
            other => panic!("unknown map access code {other}"),
        }
    }
}

/// Clear the color attachment.
pub const CLEAR_COLOR: u32 = 1 << 0;
/// Clear the depth attachment.
pub const CLEAR_DEPTH: u32 = 1 << 1;
/// Clear the stencil attachment.
pub const CLEAR_STENCIL: u32 = 1 << 2;

/// Typed payload layouts, all `Pod` so they are written into and read out
/// of the arena as plain bytes.
pub mod spec {
    use bytemuck::{Pod, Zeroable};

    use crate::handle::Handle;

    /// Payload of a buffer creation: size first so the struct packs
    /// without implicit padding.
    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
    pub struct CreateBufferSpec {
        /// Buffer size in bytes.
        pub size: u64,
        /// Usage code (vertex / index / uniform), backend-defined.
        pub usage: u32,
        /// Explicit padding.
        pub _pad: u32,
    }

    /// Payload of a 2D texture creation. Pixel bytes trail the spec.
    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
    pub struct CreateTexture2dSpec {
        /// Width in texels.
        pub width: u32,
        /// Height in texels.
        pub height: u32,
        /// Texel format code, backend-defined.
        pub format: u32,
        /// Explicit padding.
        pub _pad: u32,
    }

    /// Payload of a shader creation. The two sources trail the spec as raw
    /// bytes, vertex first, each exactly as long as its length field.
    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
    pub struct CreateShaderSpec {
        /// Length of the trailing vertex source in bytes.
        pub vertex_len: u32,
        /// Length of the trailing fragment source in bytes.
        pub fragment_len: u32,
    }

    /// One attribute in a vertex buffer layout.
    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
    pub struct LayoutEntry {
        /// Shader attribute location.
        pub location: u32,
        /// Component count (1 through 4).
        pub components: u32,
    }

    /// Payload of a buffer-layout creation. `entry_count` [`LayoutEntry`]
    /// records trail the spec.
    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
    pub struct CreateBufferLayoutSpec {
        /// Number of trailing entries.
        pub entry_count: u32,
        /// Explicit padding.
        pub _pad: u32,
    }

    /// Payload of a clear submit.
    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
    pub struct ClearSpec {
        /// Bitwise OR of the `CLEAR_*` flags.
        pub flags: u32,
        /// Explicit padding.
        pub _pad: u32,
    }

    /// Payload of a set-clear-color submit.
    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
    pub struct SetClearColorSpec {
        /// RGBA, each in `0.0..=1.0`.
        pub color: [f32; 4],
    }

    /// Payload of a bind-texture submit; the texture is the envelope handle.
    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
    pub struct BindTextureSpec {
        /// Sampler slot index.
        pub slot: u32,
        /// Explicit padding.
        pub _pad: u32,
    }

    /// Payload of an indexed draw. The shader is the envelope handle; the
    /// geometry handles ride in the payload.
    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
    pub struct DrawIndexedSpec {
        /// Vertex buffer to source attributes from.
        pub vertex_buffer: Handle,
        /// Index buffer to source indices from.
        pub index_buffer: Handle,
        /// Layout describing the vertex buffer.
        pub layout: Handle,
        /// Number of indices to draw.
        pub index_count: u32,
        /// Index element width in bytes (2 or 4).
        pub index_width: u32,
    }

    /// Payload of a pipeline toggle submit.
    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
    pub struct ToggleSpec {
        /// Option code, backend-defined (depth test, blending, ...).
        pub option: u32,
        /// Nonzero to enable.
        pub enabled: u32,
    }

    /// Payload of a set-viewport submit.
    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
    pub struct SetViewportSpec {
        /// Left edge in pixels.
        pub x: i32,
        /// Bottom edge in pixels.
        pub y: i32,
        /// Width in pixels.
        pub width: u32,
        /// Height in pixels.
        pub height: u32,
    }

    /// Payload of a map-buffer submit; the buffer is the envelope handle.
    /// The matching promise is keyed on that handle, so the payload only
    /// needs the access mode.
    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
    pub struct MapBufferSpec {
        /// [`MapAccess`](super::MapAccess) wire code.
        pub access: u32,
        /// Explicit padding.
        pub _pad: u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_sixteen_bytes() {
        assert_eq!(HEADER_SIZE, 16);
    }

    #[test]
    fn test_create_header_roundtrip() {
        let handle = Handle {
            index: 3,
            generation: 1,
        };
        let header = CommandHeader::create(ResourceType::Shader, handle, 24);

        assert_eq!(header.size as usize, HEADER_SIZE + 24);
        assert_eq!(header.payload_len(), 24);
        assert_eq!(
            CommandKind::decode(&header),
            CommandKind::Create(ResourceType::Shader)
        );
        assert_eq!(header.handle, handle);
    }

    #[test]
    fn test_submit_header_roundtrip() {
        let header = CommandHeader::submit(RenderMessage::DrawIndexed, Handle::NONE, 40);
        assert_eq!(
            CommandKind::decode(&header),
            CommandKind::Submit(RenderMessage::DrawIndexed)
        );
    }

    #[test]
    fn test_header_survives_byte_transit() {
        let header = CommandHeader::set(Handle { index: 9, generation: 2 }, 64);
        let bytes = bytemuck::bytes_of(&header);
        let back: CommandHeader = bytemuck::pod_read_unaligned(bytes);
        assert_eq!(back, header);
    }

    #[test]
    #[should_panic(expected = "unknown command kind")]
    fn test_unknown_kind_is_fatal() {
        let mut header = CommandHeader::set(Handle::NONE, 0);
        header.kind = 9;
        let _ = CommandKind::decode(&header);
    }

    #[test]
    #[should_panic(expected = "unknown render message code")]
    fn test_unknown_message_is_fatal() {
        let _ = RenderMessage::from_code(200);
    }
}
