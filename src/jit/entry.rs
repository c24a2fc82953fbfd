//! Typed native entry points.

use std::ffi::c_void;
use std::marker::PhantomData;

use super::session::{DylibId, ExecutionSession, SymbolDef};
use super::signature::{NativeFn, VaddFn};
use super::{EntryError, SessionError};

/// A compiled function reinterpreted as `F`. Borrows the session that owns
/// the machine code, so the pointer cannot outlive it.
#[derive(Debug)]
pub struct EntryPoint<'s, F: NativeFn> {
    name: String,
    address: usize,
    function: F,
    _session: PhantomData<&'s ()>,
}

impl<'s, F: NativeFn> EntryPoint<'s, F> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> usize {
        self.address
    }
}

/// Look up `name`, check its IR signature against `F`, and return a typed
/// entry point.
pub fn resolve<'s, 'ctx, F: NativeFn>(
    session: &'s ExecutionSession<'ctx>,
    dylibs: &[DylibId],
    name: &str,
) -> Result<EntryPoint<'s, F>, EntryError> {
    let expected = F::signature();
    match session.definition(dylibs, name) {
        None => return Err(SessionError::SymbolNotFound(name.to_string()).into()),
        Some(SymbolDef::Data { .. }) => {
            return Err(SessionError::NotAFunction(name.to_string()).into())
        }
        Some(SymbolDef::Function { signature, .. }) => {
            if *signature != expected {
                return Err(EntryError::SignatureMismatch {
                    name: name.to_string(),
                    expected,
                    found: signature.clone(),
                });
            }
        }
    }

    let address = session.lookup(dylibs, name)?.as_usize();
    tracing::debug!(entry = name, signature = %expected, "resolved entry point");
    Ok(EntryPoint {
        name: name.to_string(),
        address,
        // SAFETY: the IR definition's declared signature equals F's.
        function: unsafe { F::from_address(address) },
        _session: PhantomData,
    })
}

impl EntryPoint<'_, VaddFn> {
    /// Call `vadd_entry(a, b, out, n, payload, payload_len)` with
    /// `n = out.len()`.
    ///
    /// # Safety
    ///
    /// The compiled body is trusted: it must only touch `n` elements of each
    /// buffer and `payload_len` bytes of the payload.
    pub unsafe fn invoke(
        &self,
        a: &[f32],
        b: &[f32],
        out: &mut [f32],
        payload: &[u8],
    ) -> Result<(), EntryError> {
        if a.len() != out.len() || b.len() != out.len() {
            return Err(EntryError::LengthMismatch {
                a: a.len(),
                b: b.len(),
                out: out.len(),
            });
        }
        tracing::debug!(
            entry = %self.name,
            elements = out.len(),
            payload_len = payload.len(),
            "invoking entry point"
        );
        (self.function)(
            a.as_ptr() as *mut f32,
            b.as_ptr() as *mut f32,
            out.as_mut_ptr(),
            out.len() as i64,
            payload.as_ptr() as *mut c_void,
            payload.len() as i64,
        );
        Ok(())
    }
}
