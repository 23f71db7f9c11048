// Copyright 2019-2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

////////////////////////////////////////////////////////////////////////////////
// Unary T->T operators
////////////////////////////////////////////////////////////////////////////////
//
// Each of these macros generates one zero-sized `$struct_id<SRC,DST>` type per
// invocation and a set of `UnOp`/`BinOp` impls over it, one per listed scalar
// type. The slice forms hand the element loop to Rayon so a single chunk's
// worth of work can be split across the pool the same way `DefaultKernel`
// splits work across chunks.

macro_rules! impl_unop {
    ($struct_id:ident, $op:ident, $($T:ty)*) => {
        pub struct $struct_id<SRC, DST> {
            _x: std::marker::PhantomData<(SRC,DST)>,
        }

        $(
            impl UnOp<$T,$T> for $struct_id<$T,$T>
            {
                fn apply_const(src: $T) -> Result<$T, OpError>
                {
                    Ok(src.$op())
                }

                fn apply_slice(src: &[$T], dst: &mut [$T]) -> Result<(), OpError>
                {
                    assert_eq!(src.len(), dst.len());
                    src.par_iter()
                        .zip(dst.par_iter_mut())
                        .for_each(|(s, d)| *d = s.$op());
                    Ok(())
                }
            }
        )*
    }
}

////////////////////////////////////////////////////////////////////////////////
// Unary T->bool ("predicate") operators
////////////////////////////////////////////////////////////////////////////////

macro_rules! impl_unop_pred {
    ($struct_id:ident, $op:ident, $($T:ty)*) => {
        pub struct $struct_id<SRC,DST> {
            _x: std::marker::PhantomData<(SRC,DST)>,
        }

        $(
            impl UnOp<$T,bool> for $struct_id<$T,bool>
            {
                fn apply_const(src: $T) -> Result<bool, OpError>
                {
                    Ok(src.$op())
                }

                fn apply_slice(src: &[$T], dst: &mut [bool]) -> Result<(), OpError>
                {
                    assert_eq!(src.len(), dst.len());
                    src.par_iter()
                        .zip(dst.par_iter_mut())
                        .for_each(|(s, d)| *d = s.$op());
                    Ok(())
                }
            }
        )*
    }
}

////////////////////////////////////////////////////////////////////////////////
// Unsupported (SRC,DST) fallbacks: these exist so every op struct implements
// `UnOp` for every scalar type, and produce `OpError::Unsupported` rather than
// failing to compile when `DefaultKernel` dispatches dynamically.
////////////////////////////////////////////////////////////////////////////////

macro_rules! impl_unop_unsupported {
    ($struct_id:ident, $($T:ty)*) => {
        $(
            impl UnOp<$T,$T> for $struct_id<$T,$T>
            {
                fn apply_const(_src: $T) -> Result<$T, OpError> { Err(OpError::Unsupported) }
                fn apply_slice(_src: &[$T], _dst: &mut [$T]) -> Result<(), OpError> { Err(OpError::Unsupported) }
            }
        )*
    }
}

macro_rules! impl_unop_pred_unsupported {
    ($struct_id:ident, $($T:ty)*) => {
        $(
            impl UnOp<$T,bool> for $struct_id<$T,bool>
            {
                fn apply_const(_src: $T) -> Result<bool, OpError> { Err(OpError::Unsupported) }
                fn apply_slice(_src: &[$T], _dst: &mut [bool]) -> Result<(), OpError> { Err(OpError::Unsupported) }
            }
        )*
    }
}

macro_rules! impl_binop_unsupported {
    ($struct_id:ident, $($T:ty)*) => {
        $(
            impl BinOp<$T,$T> for $struct_id<$T,$T>
            {
                fn apply_slice_slice(_l: &[$T], _r: &[$T], _d: &mut [$T]) -> Result<(), OpError> { Err(OpError::Unsupported) }
                fn apply_slice_const(_l: &[$T], _r: $T, _d: &mut [$T]) -> Result<(), OpError> { Err(OpError::Unsupported) }
                fn apply_const_slice(_l: $T, _r: &[$T], _d: &mut [$T]) -> Result<(), OpError> { Err(OpError::Unsupported) }
                fn apply_const_const(_l: $T, _r: $T) -> Result<$T, OpError> { Err(OpError::Unsupported) }
            }
        )*
    }
}

macro_rules! impl_binop_pred_unsupported {
    ($struct_id:ident, $($T:ty)*) => {
        $(
            impl BinOp<$T,bool> for $struct_id<$T,bool>
            {
                fn apply_slice_slice(_l: &[$T], _r: &[$T], _d: &mut [bool]) -> Result<(), OpError> { Err(OpError::Unsupported) }
                fn apply_slice_const(_l: &[$T], _r: $T, _d: &mut [bool]) -> Result<(), OpError> { Err(OpError::Unsupported) }
                fn apply_const_slice(_l: $T, _r: &[$T], _d: &mut [bool]) -> Result<(), OpError> { Err(OpError::Unsupported) }
                fn apply_const_const(_l: $T, _r: $T) -> Result<bool, OpError> { Err(OpError::Unsupported) }
            }
        )*
    }
}

////////////////////////////////////////////////////////////////////////////////
// Binary T,T->T operators
////////////////////////////////////////////////////////////////////////////////

macro_rules! impl_binop {
    ($struct_id:ident, $op:ident, $($T:ty)*) => {
        pub struct $struct_id<SRC, DST> {
            _x: std::marker::PhantomData<(SRC,DST)>,
        }

        $(
            impl BinOp<$T,$T> for $struct_id<$T,$T>
            {
                fn apply_const_const(lhs: $T, rhs: $T) -> Result<$T, OpError>
                {
                    Ok(lhs.$op(rhs))
                }

                fn apply_slice_slice(lhs: &[$T], rhs: &[$T], dst: &mut [$T]) -> Result<(), OpError>
                {
                    assert_eq!(lhs.len(), rhs.len());
                    assert_eq!(lhs.len(), dst.len());
                    lhs.par_iter()
                        .zip(rhs.par_iter())
                        .zip(dst.par_iter_mut())
                        .for_each(|((l, r), d)| *d = l.$op(*r));
                    Ok(())
                }

                fn apply_slice_const(lhs: &[$T], rhs: $T, dst: &mut [$T]) -> Result<(), OpError>
                {
                    assert_eq!(lhs.len(), dst.len());
                    lhs.par_iter()
                        .zip(dst.par_iter_mut())
                        .for_each(|(l, d)| *d = l.$op(rhs));
                    Ok(())
                }

                fn apply_const_slice(lhs: $T, rhs: &[$T], dst: &mut [$T]) -> Result<(), OpError>
                {
                    assert_eq!(rhs.len(), dst.len());
                    rhs.par_iter()
                        .zip(dst.par_iter_mut())
                        .for_each(|(r, d)| *d = lhs.$op(*r));
                    Ok(())
                }
            }
        )*
    }
}

////////////////////////////////////////////////////////////////////////////////
// Binary T,T->bool ("predicate"/comparison) operators
////////////////////////////////////////////////////////////////////////////////

macro_rules! impl_binop_pred {
    ($struct_id:ident, $op:ident, $($T:ty)*) => {
        pub struct $struct_id<SRC,DST> {
            _x: std::marker::PhantomData<(SRC,DST)>,
        }

        $(
            impl BinOp<$T,bool> for $struct_id<$T,bool>
            {
                fn apply_const_const(lhs: $T, rhs: $T) -> Result<bool, OpError>
                {
                    Ok(lhs.$op(&rhs))
                }

                fn apply_slice_slice(lhs: &[$T], rhs: &[$T], dst: &mut [bool]) -> Result<(), OpError>
                {
                    assert_eq!(lhs.len(), rhs.len());
                    assert_eq!(lhs.len(), dst.len());
                    lhs.par_iter()
                        .zip(rhs.par_iter())
                        .zip(dst.par_iter_mut())
                        .for_each(|((l, r), d)| *d = l.$op(r));
                    Ok(())
                }

                fn apply_slice_const(lhs: &[$T], rhs: $T, dst: &mut [bool]) -> Result<(), OpError>
                {
                    assert_eq!(lhs.len(), dst.len());
                    lhs.par_iter()
                        .zip(dst.par_iter_mut())
                        .for_each(|(l, d)| *d = l.$op(&rhs));
                    Ok(())
                }

                fn apply_const_slice(lhs: $T, rhs: &[$T], dst: &mut [bool]) -> Result<(), OpError>
                {
                    assert_eq!(rhs.len(), dst.len());
                    rhs.par_iter()
                        .zip(dst.par_iter_mut())
                        .for_each(|(r, d)| *d = lhs.$op(r));
                    Ok(())
                }
            }
        )*
    }
}

////////////////////////////////////////////////////////////////////////////////
// Binary T,T->T operators taking the right operand by-reference (2-arg
// transcendental functions such as `arctan2`, expressed via `f(o_i, o_j)`).
////////////////////////////////////////////////////////////////////////////////

macro_rules! impl_binop_fn {
    ($struct_id:ident, $op:ident, $($T:ty)*) => {
        pub struct $struct_id<SRC, DST> {
            _x: std::marker::PhantomData<(SRC,DST)>,
        }

        $(
            impl BinOp<$T,$T> for $struct_id<$T,$T>
            {
                fn apply_const_const(lhs: $T, rhs: $T) -> Result<$T, OpError>
                {
                    Ok(lhs.$op(rhs))
                }

                fn apply_slice_slice(lhs: &[$T], rhs: &[$T], dst: &mut [$T]) -> Result<(), OpError>
                {
                    assert_eq!(lhs.len(), rhs.len());
                    assert_eq!(lhs.len(), dst.len());
                    lhs.par_iter()
                        .zip(rhs.par_iter())
                        .zip(dst.par_iter_mut())
                        .for_each(|((l, r), d)| *d = l.$op(*r));
                    Ok(())
                }

                fn apply_slice_const(lhs: &[$T], rhs: $T, dst: &mut [$T]) -> Result<(), OpError>
                {
                    assert_eq!(lhs.len(), dst.len());
                    lhs.par_iter()
                        .zip(dst.par_iter_mut())
                        .for_each(|(l, d)| *d = l.$op(rhs));
                    Ok(())
                }

                fn apply_const_slice(lhs: $T, rhs: &[$T], dst: &mut [$T]) -> Result<(), OpError>
                {
                    assert_eq!(rhs.len(), dst.len());
                    rhs.par_iter()
                        .zip(dst.par_iter_mut())
                        .for_each(|(r, d)| *d = lhs.$op(*r));
                    Ok(())
                }
            }
        )*
    }
}

////////////////////////////////////////////////////////////////////////////////
// Type-conversion operator, used when `ShapeAlgebra`/`ScalarTy::join` promotes
// an operand to a wider type before an op runs.
////////////////////////////////////////////////////////////////////////////////

macro_rules! impl_convop {
    ($SRC:ty, $($DST:ty)*) => {
        $(
            impl UnOp<$SRC,$DST> for ConvOp<$SRC,$DST>
            {
                fn apply_const(src: $SRC) -> Result<$DST, OpError>
                {
                    Ok(src as $DST)
                }

                fn apply_slice(src: &[$SRC], dst: &mut [$DST]) -> Result<(), OpError>
                {
                    assert_eq!(src.len(), dst.len());
                    src.par_iter()
                        .zip(dst.par_iter_mut())
                        .for_each(|(s, d)| *d = *s as $DST);
                    Ok(())
                }
            }
        )*
    }
}

macro_rules! impl_noop_convop {
    ($($T:ty)*) => {
        $(
            impl UnOp<$T,$T> for ConvOp<$T,$T>
            {
                fn apply_const(src: $T) -> Result<$T, OpError> { Ok(src) }
                fn apply_slice(src: &[$T], dst: &mut [$T]) -> Result<(), OpError>
                {
                    dst.copy_from_slice(src);
                    Ok(())
                }
            }
        )*
    }
}

macro_rules! impl_bool_convop {
    ($($T:ty)*) => {
        $(
            impl UnOp<bool,$T> for ConvOp<bool,$T>
            {
                fn apply_const(src: bool) -> Result<$T, OpError>
                {
                    Ok(if src { <$T as crate::zeroone::ConstOne>::ONE } else { <$T as crate::zeroone::ConstZero>::ZERO })
                }

                fn apply_slice(src: &[bool], dst: &mut [$T]) -> Result<(), OpError>
                {
                    assert_eq!(src.len(), dst.len());
                    src.par_iter()
                        .zip(dst.par_iter_mut())
                        .for_each(|(s, d)| *d = if *s {
                            <$T as crate::zeroone::ConstOne>::ONE
                        } else {
                            <$T as crate::zeroone::ConstZero>::ZERO
                        });
                    Ok(())
                }
            }

            impl UnOp<$T,bool> for ConvOp<$T,bool>
            {
                fn apply_const(src: $T) -> Result<bool, OpError>
                {
                    Ok(src != <$T as crate::zeroone::ConstZero>::ZERO)
                }

                fn apply_slice(src: &[$T], dst: &mut [bool]) -> Result<(), OpError>
                {
                    assert_eq!(src.len(), dst.len());
                    src.par_iter()
                        .zip(dst.par_iter_mut())
                        .for_each(|(s, d)| *d = *s != <$T as crate::zeroone::ConstZero>::ZERO);
                    Ok(())
                }
            }
        )*
    }
}
