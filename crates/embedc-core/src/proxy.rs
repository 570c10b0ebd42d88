//! Function proxies: native-callable trampolines into host functions.
//!
//! Each DEF binding becomes a libffi closure with exactly the declared C
//! signature. When native code calls it, the trampoline converts the native
//! arguments to host values, calls the host function synchronously on the
//! same thread and converts the scalar result back.
//!
//! Host failures cannot unwind through native frames. The trampoline records
//! the first failure, returns zero to native code, and the caller raises it
//! once the native call has returned.

use std::cell::RefCell;
use std::ffi::{CStr, c_char, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use libffi::low::ffi_cif;
use libffi::middle::{Cif, Closure, Type};

use crate::directive::FunctionBinding;
use crate::error::MarshalError;
use crate::host::HostFunction;
use crate::marshal::HostValue;
use crate::marshal::scalar::{ScalarCell, ffi_type};
use crate::types::NativeType;

/// Per-call state of one proxied function.
pub(crate) struct ProxyState {
    binding: FunctionBinding,
    function: Arc<dyn HostFunction>,
    failure: RefCell<Option<MarshalError>>,
}

impl ProxyState {
    pub(crate) fn new(binding: FunctionBinding, function: Arc<dyn HostFunction>) -> Self {
        Self {
            binding,
            function,
            failure: RefCell::new(None),
        }
    }

    /// The first failure recorded during the call, if any.
    pub(crate) fn take_failure(&self) -> Option<MarshalError> {
        self.failure.borrow_mut().take()
    }

    fn cif(&self) -> Cif {
        let params: Vec<Type> = self.binding.params.iter().map(|p| param_type(*p)).collect();
        let ret = match self.binding.ret {
            NativeType::Scalar(s) => ffi_type(s.repr()),
            _ => Type::void(),
        };
        Cif::new(params, ret)
    }

    fn record(&self, error: MarshalError) {
        let mut failure = self.failure.borrow_mut();
        if failure.is_none() {
            tracing::debug!("Callback `{}` failed: {}", self.binding.name, error);
            *failure = Some(error);
        }
    }

    fn callback_error(&self, reason: impl Into<String>) -> MarshalError {
        MarshalError::Callback {
            function: self.binding.name.clone(),
            reason: reason.into(),
        }
    }

    /// Convert native arguments, call the host function, convert the result.
    ///
    /// # Safety
    /// `args` must hold one valid pointer per declared parameter.
    unsafe fn dispatch(
        &self,
        args: *const *const c_void,
    ) -> Result<Option<ScalarCell>, MarshalError> {
        let mut values = Vec::with_capacity(self.binding.params.len());
        for (i, param) in self.binding.params.iter().enumerate() {
            let ptr = unsafe { *args.add(i) };
            values.push(unsafe { read_param(*param, ptr) });
        }

        let result = self
            .function
            .call(&values)
            .map_err(|reason| self.callback_error(reason))?;

        match self.binding.ret {
            NativeType::Scalar(s) => ScalarCell::from_host(&self.binding.name, s, &result)
                .map(Some)
                .map_err(|e| self.callback_error(format!("bad result: {}", e))),
            _ => Ok(None),
        }
    }
}

/// A live trampoline; valid while its state is borrowed.
pub(crate) struct Proxy<'a> {
    closure: Closure<'a>,
}

impl<'a> Proxy<'a> {
    pub(crate) fn new(state: &'a ProxyState) -> Self {
        let closure = Closure::new(state.cif(), trampoline, state);
        Self { closure }
    }

    /// Function pointer handed to the wrapper.
    pub(crate) fn code_ptr(&self) -> *const c_void {
        *self.closure.code_ptr() as *const c_void
    }
}

unsafe extern "C" fn trampoline(
    _cif: &ffi_cif,
    result: &mut u64,
    args: *const *const c_void,
    state: &ProxyState,
) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| unsafe { state.dispatch(args) }));
    let cell = match outcome {
        Ok(Ok(cell)) => cell,
        Ok(Err(error)) => {
            state.record(error);
            None
        }
        Err(_) => {
            state.record(state.callback_error("host function panicked"));
            None
        }
    };

    if let NativeType::Scalar(s) = state.binding.ret {
        let cell = cell.unwrap_or_else(|| ScalarCell::zero(s.repr()));
        unsafe { cell.store_result(result as *mut u64 as *mut c_void) };
    }
}

fn param_type(ty: NativeType) -> Type {
    match ty {
        NativeType::Scalar(s) => ffi_type(s.repr()),
        _ => Type::pointer(),
    }
}

/// # Safety
/// `ptr` must point at a value of the parameter's C type.
unsafe fn read_param(ty: NativeType, ptr: *const c_void) -> HostValue {
    match ty {
        NativeType::Scalar(s) => {
            let cell = unsafe { ScalarCell::read(s.repr(), ptr) };
            // 64-bit unsigned values past i64::MAX degrade to floats.
            cell.to_host("").unwrap_or_else(|_| match cell {
                ScalarCell::U64(v) => HostValue::Float(v as f64),
                _ => HostValue::None,
            })
        }
        NativeType::Str => {
            let s = unsafe { *(ptr as *const *const c_char) };
            if s.is_null() {
                HostValue::None
            } else {
                HostValue::Str(unsafe { CStr::from_ptr(s) }.to_string_lossy().into_owned())
            }
        }
        NativeType::Array(_) | NativeType::Void => HostValue::None,
    }
}
