/// macro used to spawn a process
///
/// this macro is just a convenient wrapper for [`spawn`].
/// However the supplied process block is not wrapped in `unsafe` block
///
/// ```
/// use gorun::go;
///
/// let h = go!(|| 6 * 7);
/// assert_eq!(h.join().unwrap(), 42);
///
/// let b = gorun::process::Builder::new().name("named".to_owned());
/// let h = go!(b, || gorun::process::current().name().map(str::to_owned)).unwrap();
/// assert_eq!(h.join().unwrap().as_deref(), Some("named"));
/// ```
///
/// [`spawn`]: process/fn.spawn.html
#[macro_export]
macro_rules! go {
    // for free spawn
    ($func:expr) => {{
        fn _go_check<F, T>(f: F) -> F
        where
            F: FnOnce() -> T + Send + 'static,
            T: Send + 'static,
        {
            f
        }
        let f = _go_check($func);
        unsafe { $crate::process::spawn(f) }
    }};

    // for builder spawn
    ($builder:expr, $func:expr) => {{
        fn _go_check<F, T>(f: F) -> F
        where
            F: FnOnce() -> T + Send + 'static,
            T: Send + 'static,
        {
            f
        }
        let f = _go_check($func);
        unsafe { $builder.spawn(f) }
    }};
}
