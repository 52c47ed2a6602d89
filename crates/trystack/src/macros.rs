/// Throws an exception from a block body and returns the resulting `Unwind`.
///
/// The exception's display name is the stringified type path and its origin
/// includes the module path.
///
/// ```
/// use trystack::{Context, ExceptionType, Flow, throw};
///
/// static NOT_FOUND: ExceptionType = ExceptionType::new("NOT_FOUND", "Not found");
///
/// fn open(ctx: &mut Context, path: &str) -> Flow {
///     if path.is_empty() {
///         throw!(ctx, NOT_FOUND);
///     }
///     throw!(ctx, NOT_FOUND, "no such file: {path}")
/// }
///
/// let mut ctx = Context::new();
/// let mut message = String::new();
/// ctx.try_block(|ctx| {
///     if ctx.enter_trying() {
///         open(ctx, "a.txt")?;
///     } else if ctx.catch(&NOT_FOUND) {
///         message = ctx.exception().map(|e| e.message().to_owned()).unwrap_or_default();
///     }
///     Ok(())
/// })
/// .unwrap();
/// assert_eq!(message, "no such file: a.txt");
/// # ctx.close().unwrap();
/// ```
#[macro_export]
macro_rules! throw {
    (@raise $exception_type:path) => {
        $crate::Raise::new(&$exception_type)
            .named(::core::stringify!($exception_type))
            .at($crate::CodeLoc::new(
                ::core::file!(),
                ::core::line!(),
                ::core::column!(),
                ::core::option::Option::Some(::core::module_path!()),
            ))
    };
    ($ctx:expr, $exception_type:path $(,)?) => {
        return ::core::result::Result::Err(($ctx).raise($crate::throw!(@raise $exception_type)))
    };
    ($ctx:expr, $exception_type:path, $($message:tt)+) => {
        return ::core::result::Result::Err(
            ($ctx).raise($crate::throw!(@raise $exception_type).message(::core::format_args!($($message)+))),
        )
    };
}
