use std::{
    cell::{Ref, RefCell, RefMut},
    rc::Rc,
};

// TbObj lets tasks mutably share testbench objects (scoreboard, coverage, ...).
// The runtime is single threaded, so Rc/RefCell is enough. Borrows must never
// be held across an await point.
pub struct TbObj<T>(Rc<RefCell<T>>);

impl<T> TbObj<T> {
    pub fn new(data: T) -> TbObj<T> {
        TbObj(Rc::new(RefCell::new(data)))
    }
    pub fn get(&self) -> Ref<'_, T> {
        (*self.0).borrow()
    }
    pub fn get_mut(&self) -> RefMut<'_, T> {
        (*self.0).borrow_mut()
    }
}

impl<T> Clone for TbObj<T> {
    fn clone(&self) -> Self {
        TbObj(self.0.clone())
    }
}

impl<T: Default> Default for TbObj<T> {
    fn default() -> Self {
        TbObj::new(T::default())
    }
}
