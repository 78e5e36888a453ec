//! Handle classes: compile-time tags naming the native type behind a handle

/// Marker for a native class exposed to the host.
///
/// `NAME` is the type tag used in diagnostics ("`Image` instance already
/// deleted").
pub trait NativeClass: Send + Sync + 'static {
    const NAME: &'static str;
}

/// Declare a native class marker.
///
/// ```rust
/// vipsbind_core::native_class!(
///     /// A region of an image.
///     Region
/// );
///
/// use vipsbind_core::handle::NativeClass;
/// assert_eq!(Region::NAME, "Region");
/// ```
#[macro_export]
macro_rules! native_class {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name;

        impl $crate::handle::NativeClass for $name {
            const NAME: &'static str = stringify!($name);
        }
    };
}

native_class!(
    /// Image handle.
    Image
);
native_class!(
    /// Interpolator used by resampling operations.
    Interpolate
);
native_class!(
    /// Base of sources and targets.
    Connection
);
native_class!(Source);
native_class!(
    /// Source whose reads are served by a host callback.
    SourceCustom
);
native_class!(Target);
native_class!(
    /// Target whose writes are delivered to a host callback.
    TargetCustom
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_names() {
        assert_eq!(Image::NAME, "Image");
        assert_eq!(SourceCustom::NAME, "SourceCustom");
        assert_eq!(TargetCustom::NAME, "TargetCustom");
    }
}
