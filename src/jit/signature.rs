//! Native calling signatures shared by JIT-compiled IR and Rust callers.
//!
//! The IR side is read from a function's declared type; the Rust side comes
//! from the function pointer type the caller wants to reinterpret the
//! address as. The resolver refuses to hand out a pointer unless both agree.

use std::ffi::c_void;
use std::fmt;

use inkwell::types::{AnyType, BasicMetadataTypeEnum, BasicTypeEnum};
use inkwell::values::FunctionValue;

/// A value type at the native call boundary.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AbiType {
    /// Integer of the given bit width.
    Int(u32),
    F32,
    F64,
    /// Opaque pointer (any address space 0 pointer).
    Ptr,
    /// Anything the bridge does not pass across the boundary (structs,
    /// vectors, arrays, other float kinds). Carries LLVM's spelling.
    Other(String),
}

impl fmt::Display for AbiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbiType::Int(bits) => write!(f, "i{}", bits),
            AbiType::F32 => write!(f, "float"),
            AbiType::F64 => write!(f, "double"),
            AbiType::Ptr => write!(f, "ptr"),
            AbiType::Other(spelling) => write!(f, "{}", spelling),
        }
    }
}

impl AbiType {
    fn from_float_spelling(spelling: String) -> Self {
        match spelling.as_str() {
            "float" => AbiType::F32,
            "double" => AbiType::F64,
            _ => AbiType::Other(spelling),
        }
    }

    fn from_param(ty: BasicMetadataTypeEnum<'_>) -> Self {
        match ty {
            BasicMetadataTypeEnum::IntType(t) => AbiType::Int(t.get_bit_width()),
            BasicMetadataTypeEnum::FloatType(t) => {
                AbiType::from_float_spelling(t.print_to_string().to_string())
            }
            BasicMetadataTypeEnum::PointerType(_) => AbiType::Ptr,
            other => match BasicTypeEnum::try_from(other) {
                Ok(basic) => AbiType::from_return(basic),
                Err(()) => AbiType::Other("metadata".to_string()),
            },
        }
    }

    fn from_return(ty: BasicTypeEnum<'_>) -> Self {
        match ty {
            BasicTypeEnum::IntType(t) => AbiType::Int(t.get_bit_width()),
            BasicTypeEnum::FloatType(t) => {
                AbiType::from_float_spelling(t.print_to_string().to_string())
            }
            BasicTypeEnum::PointerType(_) => AbiType::Ptr,
            other => AbiType::Other(other.print_to_string().to_string()),
        }
    }
}

/// Parameter and return types of a native function. `ret == None` is void.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NativeSignature {
    pub params: Vec<AbiType>,
    pub ret: Option<AbiType>,
    pub variadic: bool,
}

impl NativeSignature {
    pub fn new(params: Vec<AbiType>, ret: Option<AbiType>) -> Self {
        Self {
            params,
            ret,
            variadic: false,
        }
    }

    /// The signature an IR function declares.
    pub fn of_function(function: FunctionValue<'_>) -> Self {
        let ty = function.get_type();
        Self {
            params: ty.get_param_types().into_iter().map(|t| AbiType::from_param(t.into())).collect(),
            ret: ty.get_return_type().map(AbiType::from_return),
            variadic: ty.is_var_arg(),
        }
    }
}

impl fmt::Display for NativeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
        }
        if self.variadic {
            if !self.params.is_empty() {
                write!(f, ", ")?;
            }
            write!(f, "...")?;
        }
        write!(f, ") -> ")?;
        match &self.ret {
            Some(ret) => write!(f, "{}", ret),
            None => write!(f, "void"),
        }
    }
}

/// A Rust type that can cross the native boundary by value.
pub trait AbiValue {
    fn abi() -> AbiType;
}

/// A Rust type usable as a native return type; `()` is void.
pub trait AbiReturn {
    fn abi() -> Option<AbiType>;
}

macro_rules! abi_int {
    ($($ty:ty => $bits:expr),* $(,)?) => {
        $(
            impl AbiValue for $ty {
                fn abi() -> AbiType {
                    AbiType::Int($bits)
                }
            }
        )*
    };
}

abi_int! {
    i8 => 8, u8 => 8,
    i16 => 16, u16 => 16,
    i32 => 32, u32 => 32,
    i64 => 64, u64 => 64,
    isize => usize::BITS, usize => usize::BITS,
}

impl AbiValue for f32 {
    fn abi() -> AbiType {
        AbiType::F32
    }
}

impl AbiValue for f64 {
    fn abi() -> AbiType {
        AbiType::F64
    }
}

impl<T> AbiValue for *mut T {
    fn abi() -> AbiType {
        AbiType::Ptr
    }
}

impl<T> AbiValue for *const T {
    fn abi() -> AbiType {
        AbiType::Ptr
    }
}

impl AbiReturn for () {
    fn abi() -> Option<AbiType> {
        None
    }
}

macro_rules! abi_return {
    ($($ty:ty),* $(,)?) => {
        $(
            impl AbiReturn for $ty {
                fn abi() -> Option<AbiType> {
                    Some(<$ty as AbiValue>::abi())
                }
            }
        )*
    };
}

abi_return!(i8, u8, i16, u16, i32, u32, i64, u64, isize, usize, f32, f64, *mut c_void, *const c_void);

/// A function pointer type the resolver can produce from an address.
pub trait NativeFn: Copy {
    fn signature() -> NativeSignature;

    /// # Safety
    ///
    /// `address` must point to machine code with exactly this signature.
    unsafe fn from_address(address: usize) -> Self;
}

macro_rules! native_fn {
    ($($arg:ident),*) => {
        impl<R: AbiReturn, $($arg: AbiValue),*> NativeFn for unsafe extern "C" fn($($arg),*) -> R {
            fn signature() -> NativeSignature {
                NativeSignature::new(vec![$(<$arg as AbiValue>::abi()),*], R::abi())
            }

            unsafe fn from_address(address: usize) -> Self {
                std::mem::transmute_copy::<usize, Self>(&address)
            }
        }
    };
}

native_fn!();
native_fn!(A);
native_fn!(A, B);
native_fn!(A, B, C);
native_fn!(A, B, C, D);
native_fn!(A, B, C, D, E);
native_fn!(A, B, C, D, E, F);
native_fn!(A, B, C, D, E, F, G);

/// `vadd_entry(float* a, float* b, float* out, int64 n, void* payload, int64 payload_len)`.
pub type VaddFn = unsafe extern "C" fn(*mut f32, *mut f32, *mut f32, i64, *mut c_void, i64);
