//! Macro for defining strongly-typed identifier newtypes.
//!
//! Table and column names share the same invariant (a non-empty identifier
//! made of alphanumerics and underscores) and the same set of trait impls
//! (Display, Deref, AsRef, Borrow, TryFrom, PartialEq, Serialize,
//! Deserialize). This macro generates all of that from a single invocation.

/// Returns `true` if `s` is a usable SQL identifier for the ledger.
pub(crate) fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Define a strongly-typed identifier newtype.
///
/// Generates:
/// - The struct with `Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize`
/// - Custom `Deserialize` (rejects invalid identifiers)
/// - `new()` (panics on invalid), `try_new()` (returns Option), `as_str()`, `into_inner()`
/// - `Display`, `AsRef<str>`, `Deref<Target=str>`, `Borrow<str>`
/// - `TryFrom<String>`, `TryFrom<&str>`
/// - `PartialEq<str>`, `PartialEq<&str>`, `PartialEq<String>`
macro_rules! define_identifier {
    (
        $(#[$meta:meta])*
        $vis:vis struct $Name:ident;
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
        $vis struct $Name(String);

        impl<'de> serde::Deserialize<'de> for $Name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                $Name::try_new(s.clone()).ok_or_else(|| {
                    serde::de::Error::custom(format!(
                        concat!(stringify!($Name), " '{}' is not a valid identifier"),
                        s
                    ))
                })
            }
        }

        impl $Name {
            /// Create a new instance, panicking if the name is not an identifier.
            ///
            /// Prefer [`try_new`](Self::try_new) when handling untrusted input.
            pub fn new(name: impl Into<String>) -> Self {
                let s = name.into();
                assert!(
                    $crate::newtype_string::is_identifier(&s),
                    concat!(stringify!($Name), " must be a non-empty identifier")
                );
                Self(s)
            }

            /// Try to create a new instance, returning `None` for invalid names.
            pub fn try_new(name: impl Into<String>) -> Option<Self> {
                let s = name.into();
                if $crate::newtype_string::is_identifier(&s) {
                    Some(Self(s))
                } else {
                    None
                }
            }

            /// Return the underlying name as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume the wrapper and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::fmt::Display for $Name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $Name {
            fn as_ref(&self) -> &str { &self.0 }
        }

        impl std::ops::Deref for $Name {
            type Target = str;
            fn deref(&self) -> &str { &self.0 }
        }

        impl std::borrow::Borrow<str> for $Name {
            fn borrow(&self) -> &str { &self.0 }
        }

        impl TryFrom<String> for $Name {
            type Error = &'static str;
            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::try_new(s).ok_or(concat!(stringify!($Name), " must be a non-empty identifier"))
            }
        }

        impl TryFrom<&str> for $Name {
            type Error = &'static str;
            fn try_from(s: &str) -> Result<Self, Self::Error> {
                Self::try_new(s).ok_or(concat!(stringify!($Name), " must be a non-empty identifier"))
            }
        }

        impl PartialEq<str> for $Name {
            fn eq(&self, other: &str) -> bool { self.0 == other }
        }

        impl PartialEq<&str> for $Name {
            fn eq(&self, other: &&str) -> bool { self.0 == *other }
        }

        impl PartialEq<String> for $Name {
            fn eq(&self, other: &String) -> bool { self.0 == *other }
        }
    };
}

pub(crate) use define_identifier;
