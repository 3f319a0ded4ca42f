// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Connection configuration parameters and their validation

use crate::{error::Error, http2_error};

//= https://www.rfc-editor.org/rfc/rfc9113#section-6.5.1
//# The payload of a SETTINGS frame consists of zero or more settings,
//# each consisting of an unsigned 16-bit setting identifier and an
//# unsigned 32-bit value.

/// The wire identifier of a setting
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SettingId(u16);

impl SettingId {
    pub const HEADER_TABLE_SIZE: Self = Self(0x1);
    pub const ENABLE_PUSH: Self = Self(0x2);
    pub const MAX_CONCURRENT_STREAMS: Self = Self(0x3);
    pub const INITIAL_WINDOW_SIZE: Self = Self(0x4);
    pub const MAX_FRAME_SIZE: Self = Self(0x5);
    pub const MAX_HEADER_LIST_SIZE: Self = Self(0x6);

    /// Creates a `SettingId` from the wire representation
    #[inline]
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    /// Returns the wire representation of the identifier
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

/// A single (identifier, value) pair as carried by a SETTINGS frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Setting {
    pub id: SettingId,
    pub value: u32,
}

impl Setting {
    pub const fn new(id: SettingId, value: u32) -> Self {
        Self { id, value }
    }
}

/// Trait for validating setting values
pub trait SettingValidator: Sized {
    /// Validates that the setting is in a valid state
    fn validate(self) -> Result<Self, Error> {
        Ok(self)
    }
}

/// Creates a setting struct with its identifier and default
macro_rules! setting {
    ($(#[doc = $doc:literal])* $name:ident, $id:ident, $default:expr) => {
        $(
            #[doc = $doc]
        )*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
        pub struct $name(u32);

        impl Default for $name {
            fn default() -> Self {
                Self($default)
            }
        }

        impl $name {
            /// The wire identifier of the setting
            pub const ID: SettingId = SettingId::$id;

            /// Creates the setting with the given value, if it validates
            pub fn new(value: u32) -> Option<Self> {
                Self(value).validate().ok()
            }
        }

        impl TryFrom<u32> for $name {
            type Error = Error;

            fn try_from(value: u32) -> Result<Self, Self::Error> {
                Self(value).validate()
            }
        }

        impl core::ops::Deref for $name {
            type Target = u32;

            fn deref(&self) -> &u32 {
                &self.0
            }
        }

        impl PartialEq<u32> for $name {
            fn eq(&self, other: &u32) -> bool {
                self.0.eq(other)
            }
        }
    };
}

//= https://www.rfc-editor.org/rfc/rfc9113#section-6.5.2
//# SETTINGS_HEADER_TABLE_SIZE (0x01):
//#    This setting allows the sender to inform the remote endpoint of the
//#    maximum size of the compression table used to decode field blocks,
//#    in units of octets.

setting!(
    /// The peer's HPACK dynamic table ceiling, in octets
    HeaderTableSize,
    HEADER_TABLE_SIZE,
    4096
);

impl SettingValidator for HeaderTableSize {}

//= https://www.rfc-editor.org/rfc/rfc9113#section-6.5.2
//# SETTINGS_ENABLE_PUSH (0x02):
//#    This setting can be used to enable or disable server push.  [...]
//#    Any value other than 0 or 1 MUST be treated as a connection error
//#    (Section 5.4.1) of type PROTOCOL_ERROR.

setting!(
    /// Whether the sender is willing to accept PUSH_PROMISE frames
    EnablePush,
    ENABLE_PUSH,
    1
);

impl SettingValidator for EnablePush {
    fn validate(self) -> Result<Self, Error> {
        if self.0 <= 1 {
            Ok(self)
        } else {
            Err(http2_error!(
                PROTOCOL_ERROR,
                "SETTINGS_ENABLE_PUSH must be 0 or 1"
            ))
        }
    }
}

impl EnablePush {
    /// Returns true if the sender accepts server push
    pub fn is_enabled(&self) -> bool {
        self.0 == 1
    }
}

//= https://www.rfc-editor.org/rfc/rfc9113#section-6.5.2
//# SETTINGS_MAX_CONCURRENT_STREAMS (0x03):
//#    This setting indicates the maximum number of concurrent streams
//#    that the sender will allow.  [...] Initially, there is no limit to
//#    this value.

setting!(
    /// The number of peer-initiated streams the sender will hold open at once
    MaxConcurrentStreams,
    MAX_CONCURRENT_STREAMS,
    u32::MAX
);

impl SettingValidator for MaxConcurrentStreams {}

impl MaxConcurrentStreams {
    /// The absent-from-the-wire "no limit" value
    pub const UNLIMITED: Self = Self(u32::MAX);

    pub fn is_unlimited(&self) -> bool {
        *self == Self::UNLIMITED
    }
}

//= https://www.rfc-editor.org/rfc/rfc9113#section-6.5.2
//# SETTINGS_INITIAL_WINDOW_SIZE (0x04):
//#    This setting indicates the sender's initial window size (in
//#    octets) for stream-level flow control.  The initial value is
//#    2^16-1 (65,535) octets.
//#
//#    [...] Values above the maximum flow-control window size of 2^31-1
//#    MUST be treated as a connection error (Section 5.4.1) of type
//#    FLOW_CONTROL_ERROR.

setting!(
    /// The starting credit of every new stream's flow-control window
    InitialWindowSize,
    INITIAL_WINDOW_SIZE,
    65_535
);

impl SettingValidator for InitialWindowSize {
    fn validate(self) -> Result<Self, Error> {
        if self.0 <= (1 << 31) - 1 {
            Ok(self)
        } else {
            Err(http2_error!(
                FLOW_CONTROL_ERROR,
                "SETTINGS_INITIAL_WINDOW_SIZE exceeds the maximum window"
            ))
        }
    }
}

//= https://www.rfc-editor.org/rfc/rfc9113#section-6.5.2
//# SETTINGS_MAX_FRAME_SIZE (0x05):
//#    This setting indicates the size of the largest frame payload that
//#    the sender is willing to receive, in units of octets.
//#
//#    The initial value is 2^14 (16,384) octets.  The value advertised
//#    by an endpoint MUST be between this initial value and the maximum
//#    allowed frame size (2^24-1 or 16,777,215 octets), inclusive.
//#    Values outside this range MUST be treated as a connection error
//#    (Section 5.4.1) of type PROTOCOL_ERROR.

setting!(
    /// The largest frame payload the sender will accept
    MaxFrameSize,
    MAX_FRAME_SIZE,
    16_384
);

impl SettingValidator for MaxFrameSize {
    fn validate(self) -> Result<Self, Error> {
        if (16_384..=16_777_215).contains(&self.0) {
            Ok(self)
        } else {
            Err(http2_error!(
                PROTOCOL_ERROR,
                "SETTINGS_MAX_FRAME_SIZE out of range"
            ))
        }
    }
}

//= https://www.rfc-editor.org/rfc/rfc9113#section-6.5.2
//# SETTINGS_MAX_HEADER_LIST_SIZE (0x06):
//#    This advisory setting informs a peer of the maximum field section
//#    size that the sender is prepared to accept, in units of octets.
//#    [...] For any given request, a lower limit than what is advertised
//#    MAY be enforced.  The initial value of this setting is unlimited.

setting!(
    /// The advisory ceiling on an uncompressed field section
    MaxHeaderListSize,
    MAX_HEADER_LIST_SIZE,
    u32::MAX
);

impl SettingValidator for MaxHeaderListSize {}

/// An immutable-after-application snapshot of the six standard settings
///
/// A received SETTINGS frame is applied atomically: either every entry
/// validates and the snapshot reflects all of them, or nothing changes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Settings {
    pub header_table_size: HeaderTableSize,
    pub enable_push: EnablePush,
    pub max_concurrent_streams: MaxConcurrentStreams,
    pub initial_window_size: InitialWindowSize,
    pub max_frame_size: MaxFrameSize,
    pub max_header_list_size: MaxHeaderListSize,
}

impl Settings {
    /// Applies a received sequence of settings
    ///
    /// Duplicated identifiers overwrite in wire order.
    pub fn apply(&mut self, settings: &[Setting]) -> Result<(), Error> {
        let mut staged = *self;
        for setting in settings {
            staged.set(*setting)?;
        }
        *self = staged;
        Ok(())
    }

    fn set(&mut self, setting: Setting) -> Result<(), Error> {
        match setting.id {
            SettingId::HEADER_TABLE_SIZE => self.header_table_size = setting.value.try_into()?,
            SettingId::ENABLE_PUSH => self.enable_push = setting.value.try_into()?,
            SettingId::MAX_CONCURRENT_STREAMS => {
                self.max_concurrent_streams = setting.value.try_into()?
            }
            SettingId::INITIAL_WINDOW_SIZE => {
                self.initial_window_size = setting.value.try_into()?
            }
            SettingId::MAX_FRAME_SIZE => self.max_frame_size = setting.value.try_into()?,
            SettingId::MAX_HEADER_LIST_SIZE => {
                self.max_header_list_size = setting.value.try_into()?
            }
            //= https://www.rfc-editor.org/rfc/rfc9113#section-6.5.2
            //# An endpoint that receives a SETTINGS frame with any unknown or
            //# unsupported identifier MUST ignore that setting.
            _ => {}
        }
        Ok(())
    }

    /// Returns the parameters that differ from their protocol defaults, in
    /// ascending identifier order
    ///
    /// Omitted identifiers keep their defaults on the receiving side, so this
    /// is the exact payload of an announcing SETTINGS frame.
    pub fn to_vec(&self) -> Vec<Setting> {
        let mut settings = Vec::new();

        macro_rules! push {
            ($field:ident, $ty:ident) => {
                if self.$field != $ty::default() {
                    settings.push(Setting::new($ty::ID, *self.$field));
                }
            };
        }

        push!(header_table_size, HeaderTableSize);
        push!(enable_push, EnablePush);
        push!(max_concurrent_streams, MaxConcurrentStreams);
        push!(initial_window_size, InitialWindowSize);
        push!(max_frame_size, MaxFrameSize);
        push!(max_header_list_size, MaxHeaderListSize);

        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn defaults() {
        let settings = Settings::default();
        assert_eq!(*settings.header_table_size, 4096);
        assert!(settings.enable_push.is_enabled());
        assert!(settings.max_concurrent_streams.is_unlimited());
        assert_eq!(*settings.initial_window_size, 65_535);
        assert_eq!(*settings.max_frame_size, 16_384);

        // all defaults means nothing needs announcing
        assert!(settings.to_vec().is_empty());
    }

    #[test]
    fn validation() {
        assert!(EnablePush::new(2).is_none());
        assert!(InitialWindowSize::new(1 << 31).is_none());
        assert!(InitialWindowSize::new((1 << 31) - 1).is_some());
        assert!(MaxFrameSize::new(16_383).is_none());
        assert!(MaxFrameSize::new(16_777_216).is_none());
        assert!(MaxFrameSize::new(16_777_215).is_some());

        let err = InitialWindowSize::try_from(u32::MAX).unwrap_err();
        assert_eq!(err.code, ErrorCode::FLOW_CONTROL_ERROR);
        let err = MaxFrameSize::try_from(0).unwrap_err();
        assert_eq!(err.code, ErrorCode::PROTOCOL_ERROR);
    }

    #[test]
    fn apply_is_atomic() {
        let mut settings = Settings::default();
        let err = settings
            .apply(&[
                Setting::new(SettingId::INITIAL_WINDOW_SIZE, 1024),
                Setting::new(SettingId::ENABLE_PUSH, 42),
            ])
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::PROTOCOL_ERROR);

        // the valid prefix must not have leaked into the snapshot
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn duplicates_overwrite_in_order() {
        let mut settings = Settings::default();
        settings
            .apply(&[
                Setting::new(SettingId::INITIAL_WINDOW_SIZE, 1024),
                Setting::new(SettingId::INITIAL_WINDOW_SIZE, 2048),
            ])
            .unwrap();
        assert_eq!(*settings.initial_window_size, 2048);
    }

    #[test]
    fn unknown_identifiers_are_ignored() {
        let mut settings = Settings::default();
        settings
            .apply(&[Setting::new(SettingId::new(0xf00d), 77)])
            .unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn to_vec_round_trips() {
        let mut settings = Settings::default();
        settings
            .apply(&[
                Setting::new(SettingId::MAX_CONCURRENT_STREAMS, 128),
                Setting::new(SettingId::INITIAL_WINDOW_SIZE, 1 << 20),
            ])
            .unwrap();

        let mut peer = Settings::default();
        peer.apply(&settings.to_vec()).unwrap();
        assert_eq!(peer, settings);
    }
}
