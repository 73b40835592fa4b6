use super::uuid16_enum;

uuid16_enum! {
    /// GATT attribute types ([Vol 3] Part G, Section 3.4).
    pub enum Declaration {
        PrimaryService = 0x2800,
        SecondaryService = 0x2801,
        Include = 0x2802,
        Characteristic = 0x2803,
    }
}

uuid16_enum! {
    /// Characteristic descriptor types ([Assigned Numbers] Section 3.7).
    pub enum DescriptorType {
        CharacteristicExtendedProperties = 0x2900,
        CharacteristicUserDescription = 0x2901,
        /// Not exposed by BlueZ 5.42 and later. Notifications are managed by
        /// the daemon instead.
        ClientCharacteristicConfiguration = 0x2902,
        ServerCharacteristicConfiguration = 0x2903,
        CharacteristicPresentationFormat = 0x2904,
        CharacteristicAggregateFormat = 0x2905,
    }
}

uuid16_enum! {
    /// Characteristic types used by this crate ([Assigned Numbers] Section 3.8).
    pub enum CharacteristicType {
        DeviceName = 0x2A00,
        Appearance = 0x2A01,
        /// Served from the `org.bluez.Battery1` interface when present.
        BatteryLevel = 0x2A19,
    }
}

uuid16_enum! {
    /// Service types used by this crate ([Assigned Numbers] Section 3.4).
    pub enum ServiceType {
        GenericAccess = 0x1800,
        GenericAttribute = 0x1801,
        Battery = 0x180F,
    }
}
