use bitflags::bitflags;

bitflags! {
    /// Characteristic properties ([Vol 3] Part G, Section 3.3.1.1).
    ///
    /// Only the subset that the service reports through the `Flags` property
    /// is decoded.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
    #[repr(transparent)]
    pub struct CharProps: u8 {
        /// Permits broadcasts of the Characteristic Value using Server
        /// Characteristic Configuration Descriptor.
        const BROADCAST = 0x01;
        /// Permits reads of the Characteristic Value.
        const READ = 0x02;
        /// Permit writes of the Characteristic Value without response.
        const WRITE_WITHOUT_RESPONSE = 0x04;
        /// Permits writes of the Characteristic Value with response.
        const WRITE = 0x08;
        /// Permits notifications of a Characteristic Value without
        /// acknowledgment.
        const NOTIFY = 0x10;
        /// Permits indications of a Characteristic Value with acknowledgment.
        const INDICATE = 0x20;
    }
}

impl CharProps {
    /// Decodes `Flags` strings. Unknown flags are ignored.
    #[must_use]
    pub fn from_flags<S: AsRef<str>>(flags: impl IntoIterator<Item = S>) -> Self {
        (flags.into_iter()).fold(Self::empty(), |p, f| {
            p | match f.as_ref() {
                "broadcast" => Self::BROADCAST,
                "read" => Self::READ,
                "write-without-response" => Self::WRITE_WITHOUT_RESPONSE,
                "write" => Self::WRITE,
                "notify" => Self::NOTIFY,
                "indicate" => Self::INDICATE,
                _ => Self::empty(),
            }
        })
    }
}
