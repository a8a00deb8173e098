//! Typed calls across the dynamic-library boundary.
//!
//! A native entry point is known only by its symbol name, so the caller
//! supplies the Rust types it expects ([`AbiType`] for the return value,
//! [`AbiArgs`] for the argument tuple). Those types produce a [`Signature`]
//! which the loader compares against the entry point's declared descriptor
//! before anything is called.
//!
//! Descriptor text uses comma-separated parameter tags, an arrow and the
//! return tag:
//!
//! ```text
//! i32,i64->void      two parameters, no result
//! ->f64              no parameters
//! ptr,i32->bool      bound instance pointer first
//! ```
//!
//! An artifact may export a descriptor as a NUL-terminated character array
//! named `<function>__signature`:
//!
//! ```c
//! extern "C" const char doWork__signature[] = "i32->void";
//! ```

use std::ffi::c_void;
use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Suffix of the optional descriptor symbol exported next to an entry point.
pub const SIGNATURE_SYMBOL_SUFFIX: &str = "__signature";

/// Name of the descriptor symbol for `function`.
pub fn signature_symbol(function: &str) -> String {
    format!("{}{}", function, SIGNATURE_SYMBOL_SUFFIX)
}

/// Runtime tag of a value crossing the C ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Void,
    Bool,
    I32,
    I64,
    U32,
    U64,
    F32,
    F64,
    /// Opaque pointer, used for bound instances.
    Ptr,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            ValueType::Void => "void",
            ValueType::Bool => "bool",
            ValueType::I32 => "i32",
            ValueType::I64 => "i64",
            ValueType::U32 => "u32",
            ValueType::U64 => "u64",
            ValueType::F32 => "f32",
            ValueType::F64 => "f64",
            ValueType::Ptr => "ptr",
        };
        f.write_str(tag)
    }
}

impl FromStr for ValueType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "void" => Ok(ValueType::Void),
            "bool" => Ok(ValueType::Bool),
            "i32" | "int" => Ok(ValueType::I32),
            "i64" | "long long" | "int64_t" => Ok(ValueType::I64),
            "u32" | "unsigned" | "uint32_t" => Ok(ValueType::U32),
            "u64" | "uint64_t" => Ok(ValueType::U64),
            "f32" | "float" => Ok(ValueType::F32),
            "f64" | "double" => Ok(ValueType::F64),
            "ptr" | "void*" => Ok(ValueType::Ptr),
            other => Err(Error::argument(format!("unknown value type '{}'", other))),
        }
    }
}

/// Parameter and return tags of an entry point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub params: Vec<ValueType>,
    pub ret: ValueType,
}

impl Signature {
    pub fn new(params: impl Into<Vec<ValueType>>, ret: ValueType) -> Self {
        Self {
            params: params.into(),
            ret,
        }
    }

    /// Signature implied by the call-site type hint.
    pub fn of<R: AbiType, A: AbiArgs>() -> Self {
        Self::new(A::param_types(), R::TYPE)
    }

    /// Signature implied by a call with a bound instance pointer.
    pub fn with_context_of<R: AbiType, A: AbiArgs>() -> Self {
        let mut params = vec![ValueType::Ptr];
        params.extend(A::param_types());
        Self::new(params, R::TYPE)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self.params.iter().map(ToString::to_string).collect();
        write!(f, "{}->{}", params.join(","), self.ret)
    }
}

impl FromStr for Signature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (params, ret) = s
            .split_once("->")
            .ok_or_else(|| Error::argument(format!("signature '{}' lacks '->'", s)))?;

        let params = if params.trim().is_empty() {
            Vec::new()
        } else {
            params
                .split(',')
                .map(ValueType::from_str)
                .collect::<Result<Vec<_>>>()?
        };
        if params.contains(&ValueType::Void) {
            return Err(Error::argument(format!(
                "signature '{}' has a void parameter",
                s
            )));
        }

        Ok(Self::new(params, ret.parse()?))
    }
}

/// Address of a resolved native entry point, before it is given a type.
#[derive(Clone, Copy)]
pub struct RawEntry(unsafe extern "C" fn());

impl RawEntry {
    pub(crate) fn new(entry: unsafe extern "C" fn()) -> Self {
        Self(entry)
    }
}

impl fmt::Debug for RawEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawEntry({:p})", self.0 as *const ())
    }
}

mod private {
    pub trait SealedType {}
    pub trait SealedArgs {}
}

/// A Rust type with a fixed C ABI representation.
///
/// Values are also serde-convertible so the same type hint drives calls into
/// script modules.
pub trait AbiType: private::SealedType + Send + Serialize + DeserializeOwned + 'static {
    const TYPE: ValueType;
}

macro_rules! impl_abi_type {
    ($($ty:ty => $tag:ident),* $(,)?) => {
        $(
            impl private::SealedType for $ty {}
            impl AbiType for $ty {
                const TYPE: ValueType = ValueType::$tag;
            }
        )*
    };
}

impl_abi_type! {
    () => Void,
    bool => Bool,
    i32 => I32,
    i64 => I64,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
}

/// Argument tuple bound to an entry point to form a unit of work.
pub trait AbiArgs: private::SealedArgs + Send + 'static {
    fn param_types() -> Vec<ValueType>;

    /// Call `entry` with these arguments.
    ///
    /// # Safety
    /// `entry` must point to a C-ABI function taking exactly these argument
    /// types and returning `R`, and its library must stay loaded for the call.
    unsafe fn call<R: AbiType>(self, entry: RawEntry) -> R;

    /// Call `entry` with `context` as a leading pointer argument.
    ///
    /// # Safety
    /// As [`AbiArgs::call`], with an additional leading `void*` parameter;
    /// `context` must stay valid for the duration of the call.
    unsafe fn call_with_context<R: AbiType>(self, entry: RawEntry, context: *mut c_void) -> R;

    /// Arguments as JSON values, for script calls.
    fn to_json(&self) -> Result<Vec<Value>>;
}

macro_rules! impl_abi_args {
    ($($T:ident => $v:ident),*) => {
        impl<$($T: AbiType),*> private::SealedArgs for ($($T,)*) {}

        impl<$($T: AbiType),*> AbiArgs for ($($T,)*) {
            fn param_types() -> Vec<ValueType> {
                vec![$(<$T as AbiType>::TYPE),*]
            }

            unsafe fn call<R: AbiType>(self, entry: RawEntry) -> R {
                let ($($v,)*) = self;
                let function: unsafe extern "C" fn($($T),*) -> R =
                    std::mem::transmute_copy(&entry.0);
                function($($v),*)
            }

            unsafe fn call_with_context<R: AbiType>(self, entry: RawEntry, context: *mut c_void) -> R {
                let ($($v,)*) = self;
                let function: unsafe extern "C" fn(*mut c_void, $($T),*) -> R =
                    std::mem::transmute_copy(&entry.0);
                function(context, $($v),*)
            }

            fn to_json(&self) -> Result<Vec<Value>> {
                let ($($v,)*) = self;
                Ok(vec![$(serde_json::to_value($v)?),*])
            }
        }
    };
}

impl_abi_args!();
impl_abi_args!(A => a);
impl_abi_args!(A => a, B => b);
impl_abi_args!(A => a, B => b, C => c);
impl_abi_args!(A => a, B => b, C => c, D => d);
impl_abi_args!(A => a, B => b, C => c, D => d, E => e);
impl_abi_args!(A => a, B => b, C => c, D => d, E => e, F => f);

/// Compare a call-site hint with a declared descriptor.
pub fn check_signature(function: &str, declared: &Signature, requested: &Signature) -> Result<()> {
    if declared == requested {
        Ok(())
    } else {
        Err(Error::signature(
            function,
            declared.to_string(),
            requested.to_string(),
        ))
    }
}
