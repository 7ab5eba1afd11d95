//! Macros for defining typed UUID identifiers.

/// Macro to define a typed identifier backed by a UUID.
///
/// This generates a newtype wrapper around [`uuid::Uuid`] with:
/// - A `KIND` constant used in error messages
/// - `new()` to generate a fresh random (v4) identifier
/// - `parse()` to parse the hyphenated textual form
/// - `Display` and `FromStr` implementations
/// - `Serialize` and `Deserialize` implementations as plain strings
/// - `Ord`, `Hash`, and other standard traits
///
/// # Example
///
/// ```ignore
/// define_uuid!(InstanceUuid, "instance_uuid");
///
/// let id: InstanceUuid = "3390740c-dce9-48d6-b83a-a717417072ce".parse()?;
/// ```
#[macro_export]
macro_rules! define_uuid {
    ($name:ident, $kind:literal) => {
        /// A typed UUID identifier.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name($crate::Uuid);

        impl $name {
            /// Name used for this identifier in payloads and errors.
            pub const KIND: &'static str = $kind;

            /// Creates a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self($crate::Uuid::new_v4())
            }

            /// Creates an identifier from a raw UUID.
            #[must_use]
            pub const fn from_uuid(uuid: $crate::Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            #[must_use]
            pub const fn uuid(&self) -> $crate::Uuid {
                self.0
            }

            /// Parses an identifier from its textual form.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                if s.is_empty() {
                    return Err($crate::IdError::Empty { kind: Self::KIND });
                }

                let uuid = s
                    .parse::<$crate::Uuid>()
                    .map_err(|e| $crate::IdError::InvalidUuid {
                        kind: Self::KIND,
                        value: s.to_string(),
                        message: e.to_string(),
                    })?;

                Ok(Self(uuid))
            }

            /// First eight hex digits, enough to name host-side resources.
            #[must_use]
            pub fn short(&self) -> String {
                let mut buf = $crate::Uuid::encode_buffer();
                self.0.simple().encode_lower(&mut buf)[..8].to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0.hyphenated())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl From<$crate::Uuid> for $name {
            fn from(uuid: $crate::Uuid) -> Self {
                Self(uuid)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.collect_str(&self.0.hyphenated())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }

        impl AsRef<$crate::Uuid> for $name {
            fn as_ref(&self) -> &$crate::Uuid {
                &self.0
            }
        }
    };
}
