//! Dynamically-typed invocation of traced functions.
//!
//! A [`Callable`] declares its parameter and return types and takes its
//! arguments as a `Vec<DynValue>`. The profiler checks the argument list
//! against the declaration before anything runs, so a mismatched call fails
//! without ever reaching the target.
//!
//! ```ignore
//! let add = callable("add", |a: i64, b: i64| (a + b,));
//! let out = profiler.trace_callable(&add, vec![DynValue::new(2i64), DynValue::new(3i64)])?;
//! assert_eq!(out.first_as::<i64>(), Some(5));
//! ```

use std::any::{type_name, Any, TypeId};
use std::fmt;

use crate::error::{ProfilerError, ProfilerResult};

// ----------------------------------------------------------------------------
// Values & Types
// ----------------------------------------------------------------------------

/// A boxed value that remembers its concrete type.
pub struct DynValue {
    value: Box<dyn Any + Send>,
    type_id: TypeId,
    type_name: &'static str,
}

impl DynValue {
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self {
            value: Box::new(value),
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Take the value out, or get `self` back if `T` is the wrong type.
    pub fn downcast<T: Any>(self) -> Result<T, Self> {
        if !self.is::<T>() {
            return Err(self);
        }
        let DynValue { value, type_id, type_name } = self;
        value
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|value| DynValue { value, type_id, type_name })
    }
}

impl fmt::Debug for DynValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynValue").field("type", &self.type_name).finish()
    }
}

/// A declared parameter or return type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamType {
    id: TypeId,
    name: &'static str,
}

impl ParamType {
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// A `DynValue` parameter takes any argument; every other type only
    /// takes itself.
    pub fn accepts(&self, value: &DynValue) -> bool {
        self.id == TypeId::of::<DynValue>() || self.id == value.type_id()
    }
}

/// Shorten every path in a type name to its last segment:
/// `alloc::vec::Vec<alloc::string::String>` becomes `Vec<String>`.
pub fn short_type_name(full: &str) -> String {
    let mut out = String::with_capacity(full.len());
    let mut segment_start = 0;

    for (i, c) in full.char_indices() {
        if c.is_alphanumeric() || c == '_' || c == ':' {
            continue;
        }
        out.push_str(last_segment(&full[segment_start..i]));
        out.push(c);
        segment_start = i + c.len_utf8();
    }
    out.push_str(last_segment(&full[segment_start..]));
    out
}

fn last_segment(path: &str) -> &str {
    path.rsplit("::").next().unwrap_or(path)
}

// ----------------------------------------------------------------------------
// Callable
// ----------------------------------------------------------------------------

/// A function invocable with a dynamically-typed argument list.
pub trait Callable: Send + Sync {
    fn name(&self) -> &str;

    fn params(&self) -> &[ParamType];

    fn returns(&self) -> &[ParamType];

    /// Call the target. Arguments must already satisfy [`validate_args`].
    fn invoke(&self, args: Vec<DynValue>) -> ProfilerResult<Vec<DynValue>>;
}

/// Check count first, then each argument's type in order.
pub fn validate_args(params: &[ParamType], args: &[DynValue]) -> ProfilerResult<()> {
    if params.len() != args.len() {
        return Err(ProfilerError::ArgumentCountMismatch {
            expected: params.len(),
            got: args.len(),
        });
    }

    for (index, (param, arg)) in params.iter().zip(args).enumerate() {
        if !param.accepts(arg) {
            return Err(ProfilerError::ArgumentTypeMismatch {
                index,
                expected: param.name(),
                got: arg.type_name(),
            });
        }
    }
    Ok(())
}

/// Identity of a reflective call: `name(params)->(returns)`, each part only
/// when non-empty. Path separators in the name become `-`.
pub fn signature_identity(callable: &dyn Callable) -> String {
    let mut identity = callable.name().replace('/', "-");

    let join = |types: &[ParamType]| {
        types
            .iter()
            .map(|t| short_type_name(t.name()))
            .collect::<Vec<_>>()
            .join(",")
    };

    if !callable.params().is_empty() {
        identity = format!("{}({})", identity, join(callable.params()));
    }
    if !callable.returns().is_empty() {
        identity = format!("{}->({})", identity, join(callable.returns()));
    }
    identity
}

// ----------------------------------------------------------------------------
// Return Values
// ----------------------------------------------------------------------------

/// Return shapes a callable may have: `()` or a tuple of up to four values.
pub trait ReturnValues: Send + 'static {
    fn types() -> Vec<ParamType>;

    fn into_values(self) -> Vec<DynValue>;
}

impl ReturnValues for () {
    fn types() -> Vec<ParamType> {
        Vec::new()
    }

    fn into_values(self) -> Vec<DynValue> {
        Vec::new()
    }
}

macro_rules! impl_return_values {
    ($($ty:ident),+) => {
        impl<$($ty: Any + Send),+> ReturnValues for ($($ty,)+) {
            fn types() -> Vec<ParamType> {
                vec![$(ParamType::of::<$ty>()),+]
            }

            #[allow(non_snake_case)]
            fn into_values(self) -> Vec<DynValue> {
                let ($($ty,)+) = self;
                vec![$(DynValue::new($ty)),+]
            }
        }
    };
}

impl_return_values!(R1);
impl_return_values!(R1, R2);
impl_return_values!(R1, R2, R3);
impl_return_values!(R1, R2, R3, R4);

/// Results of a reflective call, in declaration order.
#[derive(Debug, Default)]
pub struct CallResults(Vec<DynValue>);

impl CallResults {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DynValue> {
        self.0.get(index)
    }

    pub fn first(&self) -> Option<&DynValue> {
        self.0.first()
    }

    /// First result if it has type `T`
    pub fn first_as<T: Any + Clone>(&self) -> Option<T> {
        self.first().and_then(|v| v.downcast_ref::<T>()).cloned()
    }

    pub fn into_first(self) -> Option<DynValue> {
        self.0.into_iter().next()
    }

    pub fn into_vec(self) -> Vec<DynValue> {
        self.0
    }
}

impl From<Vec<DynValue>> for CallResults {
    fn from(values: Vec<DynValue>) -> Self {
        Self(values)
    }
}

// ----------------------------------------------------------------------------
// Function Adapters
// ----------------------------------------------------------------------------

type Invoker = Box<dyn Fn(Vec<DynValue>) -> ProfilerResult<Vec<DynValue>> + Send + Sync>;

/// [`Callable`] over a Rust closure or function.
pub struct FnCallable {
    name: String,
    params: Vec<ParamType>,
    returns: Vec<ParamType>,
    invoker: Invoker,
}

impl fmt::Debug for FnCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCallable")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("returns", &self.returns)
            .finish()
    }
}

impl Callable for FnCallable {
    fn name(&self) -> &str {
        &self.name
    }

    fn params(&self) -> &[ParamType] {
        &self.params
    }

    fn returns(&self) -> &[ParamType] {
        &self.returns
    }

    fn invoke(&self, args: Vec<DynValue>) -> ProfilerResult<Vec<DynValue>> {
        (self.invoker)(args)
    }
}

/// Pull the next argument out as `T`.
fn take_arg<T: Any>(args: &mut std::vec::IntoIter<DynValue>, index: usize) -> ProfilerResult<T> {
    let arg = args.next().ok_or(ProfilerError::ArgumentCountMismatch {
        expected: index + 1,
        got: index,
    })?;

    if TypeId::of::<T>() == TypeId::of::<DynValue>() {
        // Parameter declared as DynValue: hand over the wrapper itself.
        let boxed: Box<dyn Any> = Box::new(arg);
        return boxed.downcast::<T>().map(|b| *b).map_err(|_| ProfilerError::ArgumentTypeMismatch {
            index,
            expected: type_name::<T>(),
            got: type_name::<DynValue>(),
        });
    }

    arg.downcast::<T>().map_err(|arg| ProfilerError::ArgumentTypeMismatch {
        index,
        expected: type_name::<T>(),
        got: arg.type_name(),
    })
}

/// Conversion of plain functions into [`FnCallable`], for arities 0 to 4.
pub trait IntoCallable<Args> {
    fn into_callable(self, name: impl Into<String>) -> FnCallable;
}

macro_rules! impl_into_callable {
    ($($arg:ident),*) => {
        impl<F, R, $($arg),*> IntoCallable<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> R + Send + Sync + 'static,
            R: ReturnValues,
            $($arg: Any + Send,)*
        {
            #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
            fn into_callable(self, name: impl Into<String>) -> FnCallable {
                FnCallable {
                    name: name.into(),
                    params: vec![$(ParamType::of::<$arg>()),*],
                    returns: R::types(),
                    invoker: Box::new(move |args: Vec<DynValue>| {
                        let mut args = args.into_iter();
                        let mut index = 0usize;
                        $(
                            let $arg: $arg = take_arg::<$arg>(&mut args, index)?;
                            index += 1;
                        )*
                        Ok((self)($($arg),*).into_values())
                    }),
                }
            }
        }
    };
}

impl_into_callable!();
impl_into_callable!(A1);
impl_into_callable!(A1, A2);
impl_into_callable!(A1, A2, A3);
impl_into_callable!(A1, A2, A3, A4);

/// Wrap `f` as a named [`Callable`].
pub fn callable<F, Args>(name: impl Into<String>, f: F) -> FnCallable
where
    F: IntoCallable<Args>,
{
    f.into_callable(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name("alloc::string::String"), "String");
        assert_eq!(short_type_name("i32"), "i32");
        assert_eq!(
            short_type_name("alloc::vec::Vec<alloc::string::String>"),
            "Vec<String>"
        );
        assert_eq!(
            short_type_name("core::result::Result<f64, alloc::string::String>"),
            "Result<f64, String>"
        );
        assert_eq!(short_type_name("&str"), "&str");
    }

    #[test]
    fn test_downcast() {
        let value = DynValue::new(42u32);
        assert!(value.is::<u32>());
        let value = value.downcast::<i64>().unwrap_err();
        assert_eq!(value.downcast::<u32>().unwrap(), 42);
    }

    #[test]
    fn test_validate_count_before_types() {
        let params = [ParamType::of::<String>(), ParamType::of::<i32>()];
        let err = validate_args(&params, &[DynValue::new(1u8)]).unwrap_err();
        assert!(matches!(err, ProfilerError::ArgumentCountMismatch { expected: 2, got: 1 }));
    }

    #[test]
    fn test_validate_type_mismatch_reports_index() {
        let params = [ParamType::of::<String>(), ParamType::of::<i32>()];
        let err = validate_args(&params, &[DynValue::new(String::new()), DynValue::new(1i64)]).unwrap_err();
        assert!(matches!(err, ProfilerError::ArgumentTypeMismatch { index: 1, .. }));
    }

    #[test]
    fn test_dyn_value_parameter_accepts_anything() {
        let echo = callable("echo", |v: DynValue| (v.type_name(),));
        assert!(validate_args(echo.params(), &[DynValue::new(3.5f64)]).is_ok());

        let out = echo.invoke(vec![DynValue::new(3.5f64)]).unwrap();
        assert_eq!(out[0].downcast_ref::<&'static str>(), Some(&"f64"));
    }

    #[test]
    fn test_signature_identity() {
        let f = callable("pkg/handler", |_name: String, _n: i32| (0.5f64, Ok::<(), String>(())));
        assert_eq!(
            signature_identity(&f),
            "pkg-handler(String,i32)->(f64,Result<(), String>)"
        );

        let plain = callable("tick", || ());
        assert_eq!(signature_identity(&plain), "tick");
    }

    #[test]
    fn test_invoke_returns_all_values() {
        let split = callable("split", |n: i64| (n / 2, n % 2, n < 0));
        let out = split.invoke(vec![DynValue::new(7i64)]).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].downcast_ref::<i64>(), Some(&3));
        assert_eq!(out[1].downcast_ref::<i64>(), Some(&1));
        assert_eq!(out[2].downcast_ref::<bool>(), Some(&false));
    }
}
